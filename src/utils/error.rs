use thiserror::Error;

use crate::models::FailureKind;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Image error for {url}: {message}")]
    Image { url: String, message: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Plugin error: {0}")]
    PluginError(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

impl AppError {
    /// Failure category for errors that carry one on their own.
    ///
    /// Transport-level errors (`Io`, `Serialization`, ...) return `None`; the
    /// caller attributes them to whichever pipeline stage raised them.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            AppError::Http(_) | AppError::Fetch { .. } | AppError::UnexpectedStatus { .. } => {
                Some(FailureKind::Fetch)
            }
            AppError::Parse { .. } | AppError::ElementNotFound { .. } => Some(FailureKind::Parse),
            AppError::Image { .. } => Some(FailureKind::Image),
            AppError::Template(_) => Some(FailureKind::Template),
            AppError::Cancelled => Some(FailureKind::Cancelled),
            _ => None,
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Network failures, 429 and 5xx responses are transient. Everything else
    /// (404, parse failures, a login redirect) is returned immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => !e.is_builder() && !e.is_redirect(),
            AppError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        AppError::Parse {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
