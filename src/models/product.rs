use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::utils::error::{AppError, Result};

/// Query parameters that carry a product id, in priority order.
const ID_QUERY_KEYS: [&str; 3] = ["it_id", "product_no", "id"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub title: String,
    /// Listed (wholesale) price as shown on the page.
    pub price: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub sizes: Vec<String>,
    pub colors: Vec<String>,
    /// Image URLs in page order.
    pub image_urls: Vec<String>,
    pub source_url: String,
    /// Retail price from the input sheet, if any.
    pub selling_price: Option<i64>,
}

impl Product {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            price: String::new(),
            description: None,
            brand: None,
            sizes: Vec::new(),
            colors: Vec::new(),
            image_urls: Vec::new(),
            source_url: source_url.into(),
            selling_price: None,
        }
    }

    /// Checks the fields every downstream stage depends on.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::parse("product id is empty"));
        }
        if self.source_url.trim().is_empty() {
            return Err(AppError::parse(format!("product {} has no source url", self.id)));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::parse(format!("product {} has no title", self.id)));
        }
        if self.price.trim().is_empty() {
            return Err(AppError::parse(format!("product {} has no price", self.id)));
        }
        Ok(())
    }

    /// The price to advertise: the sheet's selling price, else the listed one.
    pub fn display_price(&self) -> String {
        match self.selling_price {
            Some(price) => price.to_string(),
            None => self.price.clone(),
        }
    }
}

/// Derives a stable product id from a product page URL.
///
/// `it_id`, `product_no` and `id` query parameters win; otherwise the stem of
/// the last path segment; otherwise a short hash of the whole URL.
pub fn product_id_from_url(raw: &str) -> String {
    if let Ok(url) = Url::parse(raw) {
        for key in ID_QUERY_KEYS {
            if let Some((_, value)) = url.query_pairs().find(|(k, v)| k == key && !v.is_empty()) {
                return value.into_owned();
            }
        }

        if let Some(segment) = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        {
            let stem = segment.split('.').next().unwrap_or_default();
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }

    let digest = Sha256::digest(raw.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}
