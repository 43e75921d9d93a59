//! Generic adapter for shops that publish Open Graph product metadata.

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use crate::models::{Product, Target, product_id_from_url};
use crate::plugins::traits::{SiteAdapter, resolve_identifier};
use crate::session::FetchedPage;
use crate::utils::error::{AppError, Result};

const PRICE_PROPERTIES: [&str; 2] = ["product:price:amount", "og:price:amount"];

pub struct OpenGraphAdapter {
    meta: Selector,
}

impl OpenGraphAdapter {
    pub fn new() -> Result<Self> {
        let meta = Selector::parse("meta[property][content]")
            .map_err(|e| AppError::Validation(format!("invalid meta selector: {:?}", e)))?;
        Ok(Self { meta })
    }

    fn properties<'a>(&self, document: &'a Html, property: &str) -> Vec<&'a str> {
        document
            .select(&self.meta)
            .filter(|el| el.value().attr("property") == Some(property))
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn first(&self, document: &Html, property: &str) -> Option<String> {
        self.properties(document, property).first().map(|c| c.to_string())
    }
}

#[async_trait]
impl SiteAdapter for OpenGraphAdapter {
    fn name(&self) -> &str {
        "open_graph"
    }

    fn description(&self) -> &str {
        "Any shop exposing og:* and product:price:* meta tags"
    }

    fn resolve(&self, target: &Target) -> Result<Url> {
        resolve_identifier(target, |id| {
            Err(AppError::Validation(format!(
                "open_graph targets must be page URLs, got '{}'",
                id
            )))
        })
    }

    fn parse(&self, target: &Target, page: &FetchedPage) -> Result<Product> {
        let document = Html::parse_document(&page.body);

        let title = self
            .first(&document, "og:title")
            .ok_or_else(|| AppError::ElementNotFound {
                selector: "meta[property=og:title]".to_string(),
            })?;
        let price = PRICE_PROPERTIES
            .iter()
            .find_map(|p| self.first(&document, p))
            .ok_or_else(|| AppError::ElementNotFound {
                selector: "meta[property=product:price:amount]".to_string(),
            })?;

        let mut image_urls: Vec<String> = Vec::new();
        for src in self.properties(&document, "og:image") {
            if let Ok(url) = page.final_url.join(src) {
                let url = url.to_string();
                if !image_urls.contains(&url) {
                    image_urls.push(url);
                }
            }
        }

        let url = page.requested_url.as_str();
        let mut product = Product::new(product_id_from_url(url), url);
        product.title = title;
        product.price = price;
        product.description = self.first(&document, "og:description");
        product.brand = self.first(&document, "product:brand");
        product.image_urls = image_urls;
        product.selling_price = target.selling_price;
        Ok(product)
    }
}
