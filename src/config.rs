use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::utils::error::Result;
use crate::utils::retry::RetryPolicy;

pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.yaml";

/// Upper bound on workers; the storefront throttles aggressive clients.
const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub site: SiteConfig,
    pub scraper: ScraperConfig,
    pub images: ImageConfig,
    pub message: MessageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_csv: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub message_template: PathBuf,
    pub summary_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_csv: None,
            output_dir: PathBuf::from("output"),
            message_template: PathBuf::from("templates/message_template.txt"),
            summary_file: "summary.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Registered site adapter name.
    pub adapter: String,
    pub base_url: String,
    pub login_url: Option<String>,
    pub login_form: LoginFormConfig,
    pub username: Option<String>,
    pub password: Option<String>,
    pub selectors: SelectorConfig,
    /// Pause after every product page fetch.
    pub request_delay_ms: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            adapter: "kidsvillage".to_string(),
            base_url: "https://www.kidsvillage.example".to_string(),
            login_url: None,
            login_form: LoginFormConfig::default(),
            username: None,
            password: None,
            selectors: SelectorConfig::default(),
            request_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginFormConfig {
    pub id_field: String,
    pub pw_field: String,
}

impl Default for LoginFormConfig {
    fn default() -> Self {
        Self {
            id_field: "mb_id".to_string(),
            pw_field: "mb_password".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub product_name: String,
    /// Element whose `value` attribute holds the price.
    pub price: String,
    pub description: String,
    pub detail_images: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            product_name: "#sit_title".to_string(),
            price: "#it_price".to_string(),
            description: "#sit_inf_explan".to_string(),
            detail_images: "#sit_inf_explan img".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout: 15,
            user_agent: concat!("kidsvillage-collector/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Fewest stored images a product needs to count as collected.
    pub min_images: usize,
    /// Reuse identical bytes instead of downloading or storing them again.
    pub dedup: bool,
    /// Cap on images taken per product; `None` takes all of them.
    pub max_images: Option<usize>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            min_images: 1,
            dedup: true,
            max_images: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePolicy {
    /// A render failure fails the target.
    #[default]
    Required,
    /// A render failure leaves the target done, without a message.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub required_placeholders: Vec<String>,
    pub policy: MessagePolicy,
    /// Also write `message.txt` next to the product's images.
    pub write_files: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            required_placeholders: vec!["title".to_string()],
            policy: MessagePolicy::Required,
            write_files: true,
        }
    }
}

impl AppConfig {
    /// Loads settings from an optional YAML file, then `KIDSVILLAGE__*`
    /// environment variables (after reading `.env`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let settings_path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_PATH));
        let s = Config::builder()
            .add_source(File::from(settings_path).required(path.is_some()))
            .add_source(Environment::with_prefix("KIDSVILLAGE").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.scraper.concurrency == 0 || self.scraper.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Message(format!(
                "Scraper concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }

        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message(
                "Scraper request_timeout must be greater than 0".into(),
            ));
        }

        if Url::parse(&self.site.base_url).is_err() {
            return Err(ConfigError::Message("Invalid site base_url format".into()));
        }

        if let Some(login_url) = &self.site.login_url {
            if Url::parse(login_url).is_err() {
                return Err(ConfigError::Message("Invalid site login_url format".into()));
            }
        }

        if self.paths.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Message("Output directory must not be empty".into()));
        }

        if let Some(max) = self.images.max_images {
            if max < self.images.min_images {
                return Err(ConfigError::Message(
                    "images.max_images cannot be below images.min_images".into(),
                ));
            }
        }

        Ok(())
    }
}
