//! Shared, cookie-aware HTTP session.
//!
//! One session is built per run and handed to the scraper, the site adapter
//! and the image manager, so a login performed by the adapter also
//! authorises image downloads.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub requested_url: Url,
    /// URL after redirects.
    pub final_url: Url,
    pub body: String,
}

/// A fetched binary resource.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }

    pub async fn get_page(&self, url: &Url) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await?;
        let response = check_status(response)?;
        let final_url = response.url().clone();
        let body = response.text().await?;

        Ok(FetchedPage {
            requested_url: url.clone(),
            final_url,
            body,
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<FetchedBytes> {
        let response = self.client.get(url).send().await?;
        let response = check_status(response)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedBytes { bytes, content_type })
    }

    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<FetchedPage> {
        let requested_url = Url::parse(url).map_err(|e| AppError::Fetch {
            url: url.to_string(),
            message: format!("invalid url: {}", e),
        })?;
        let response = self.client.post(url).form(form).send().await?;
        let response = check_status(response)?;
        let final_url = response.url().clone();
        let body = response.text().await?;

        Ok(FetchedPage {
            requested_url,
            final_url,
            body,
        })
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::Fetch {
            url,
            message: "not found (404)".to_string(),
        });
    }
    Err(AppError::UnexpectedStatus {
        status: status.as_u16(),
        url,
    })
}
