use async_trait::async_trait;
use url::Url;

use crate::models::{Product, Target};
use crate::session::{FetchedPage, HttpSession};
use crate::utils::error::{AppError, Result};

/// Capability interface for one source site.
///
/// The scraper owns retries, timeouts and cancellation; an adapter only knows
/// how to address, fetch and read its site's product pages.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Plugin metadata
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Maps a target identifier (page URL or site-specific id) to a page URL.
    fn resolve(&self, target: &Target) -> Result<Url>;

    /// Establishes a session, if the site needs one. Called once per run.
    async fn login(&self, _session: &HttpSession) -> Result<()> {
        Ok(())
    }

    /// Retrieves one product page. Errors from here are subject to retry.
    async fn fetch(&self, session: &HttpSession, url: &Url) -> Result<FetchedPage> {
        session.get_page(url).await
    }

    /// Reads a product out of a fetched page. Must not return a record with
    /// required fields missing.
    fn parse(&self, target: &Target, page: &FetchedPage) -> Result<Product>;
}

/// Treats identifiers that parse as absolute URLs as page URLs; anything else
/// is handed to `from_id` as a site-specific id.
pub fn resolve_identifier(
    target: &Target,
    from_id: impl FnOnce(&str) -> Result<Url>,
) -> Result<Url> {
    let identifier = target.identifier.trim();
    if identifier.is_empty() {
        return Err(AppError::Validation("empty target identifier".to_string()));
    }
    match Url::parse(identifier) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(url),
        _ => from_id(identifier),
    }
}
