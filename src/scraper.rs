use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::models::{Product, Target};
use crate::plugins::manager::SiteAdapterRef;
use crate::session::HttpSession;
use crate::utils::error::{AppError, Result};
use crate::utils::retry::{RetryPolicy, retry_transient};

/// Turns targets into validated [`Product`] records.
///
/// Site specifics live in the adapter; this type adds the retry budget and
/// the politeness delay between page requests.
#[derive(Clone)]
pub struct WebScraper {
    adapter: SiteAdapterRef,
    session: HttpSession,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl WebScraper {
    pub fn new(adapter: SiteAdapterRef, session: HttpSession, config: &AppConfig) -> Self {
        Self::with_settings(
            adapter,
            session,
            config.scraper.retry_policy(),
            Duration::from_millis(config.site.request_delay_ms),
        )
    }

    pub fn with_settings(
        adapter: SiteAdapterRef,
        session: HttpSession,
        retry: RetryPolicy,
        request_delay: Duration,
    ) -> Self {
        Self {
            adapter,
            session,
            retry,
            request_delay,
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Logs in through the adapter. Not retried: a rejected login will not
    /// get better on a second attempt.
    pub async fn login(&self) -> Result<()> {
        tracing::info!(adapter = self.adapter.name(), "establishing site session");
        self.adapter.login(&self.session).await
    }

    pub async fn scrape(&self, target: &Target) -> Result<Product> {
        let url = self.adapter.resolve(target).map_err(|e| AppError::Fetch {
            url: target.identifier.clone(),
            message: format!("cannot resolve target: {}", e),
        })?;

        let start = Instant::now();
        let adapter = &self.adapter;
        let session = &self.session;
        let page_url = &url;
        let page = retry_transient(self.retry, url.as_str(), move || {
            adapter.fetch(session, page_url)
        })
        .await?;

        tracing::debug!(
            url = %url,
            final_url = %page.final_url,
            bytes = page.body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched product page"
        );

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let product = self.adapter.parse(target, &page)?;
        product.validate()?;
        Ok(product)
    }
}
