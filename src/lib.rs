pub mod config;
pub mod image_manager;
pub mod message_builder;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod report;
pub mod scraper;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::{Orchestrator, ProgressEvent};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
