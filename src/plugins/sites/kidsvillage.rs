//! KidsVillage wholesale storefront (a Gnuboard5 shop).
//!
//! Product pages live at `/shop/item.php?it_id=<id>` and require a member
//! session. Title, price and detail images come from configurable selectors;
//! brand, colors and sizes from the product information table on the page.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::{LoginFormConfig, SiteConfig};
use crate::models::{Product, Target, product_id_from_url};
use crate::plugins::traits::{SiteAdapter, resolve_identifier};
use crate::session::{FetchedPage, HttpSession};
use crate::utils::error::{AppError, Result};

const BRAND_HEADER: &str = "브랜드";
const COLOR_HEADER: &str = "색상";
const SIZE_HEADER: &str = "사이즈";

struct PageSelectors {
    title: (String, Selector),
    price: (String, Selector),
    description: Option<Selector>,
    images: Option<Selector>,
    table_header: Selector,
}

pub struct KidsVillageAdapter {
    base_url: Url,
    login_url: Option<String>,
    login_form: LoginFormConfig,
    credentials: Option<(String, String)>,
    selectors: PageSelectors,
}

impl KidsVillageAdapter {
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let base_url = Url::parse(&site.base_url).map_err(|e| {
            AppError::Validation(format!("invalid base_url '{}': {}", site.base_url, e))
        })?;

        let credentials = match (&site.username, &site.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        };

        let sel = &site.selectors;
        let selectors = PageSelectors {
            title: (sel.product_name.clone(), compile(&sel.product_name)?),
            price: (sel.price.clone(), compile(&sel.price)?),
            description: compile_optional(&sel.description)?,
            images: compile_optional(&sel.detail_images)?,
            table_header: compile("th")?,
        };

        Ok(Self {
            base_url,
            login_url: site.login_url.clone(),
            login_form: site.login_form.clone(),
            credentials,
            selectors,
        })
    }

    fn item_url(&self, id: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join("/shop/item.php")
            .map_err(|e| AppError::Validation(format!("cannot build item url: {}", e)))?;
        url.query_pairs_mut().append_pair("it_id", id);
        Ok(url)
    }

    fn is_login_page(url: &Url) -> bool {
        url.path().contains("login.php")
    }

    /// `<td>` following the first `<th>` whose text contains `header`.
    fn table_value(&self, document: &Html, header: &str) -> Option<String> {
        let th = document
            .select(&self.selectors.table_header)
            .find(|th| element_text(th).contains(header))?;
        let td = th
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "td")?;
        let text = element_text(&td);
        if text.is_empty() { None } else { Some(text) }
    }

    fn table_list(&self, document: &Html, header: &str) -> Vec<String> {
        self.table_value(document, header)
            .map(|raw| {
                raw.split('/')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn image_urls(&self, document: &Html) -> Vec<String> {
        let Some(selector) = &self.selectors.images else {
            return Vec::new();
        };
        let mut urls: Vec<String> = Vec::new();
        for img in document.select(selector) {
            let Some(src) = img.value().attr("src").map(str::trim) else {
                continue;
            };
            if src.is_empty() || src.starts_with("data:") {
                continue;
            }
            match self.base_url.join(src) {
                Ok(url) => {
                    let url = url.to_string();
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
                Err(e) => tracing::debug!(src, error = %e, "skipping unresolvable image src"),
            }
        }
        urls
    }
}

#[async_trait]
impl SiteAdapter for KidsVillageAdapter {
    fn name(&self) -> &str {
        "kidsvillage"
    }

    fn description(&self) -> &str {
        "KidsVillage wholesale shop (Gnuboard5)"
    }

    fn resolve(&self, target: &Target) -> Result<Url> {
        resolve_identifier(target, |id| self.item_url(id))
    }

    async fn login(&self, session: &HttpSession) -> Result<()> {
        let Some(login_url) = &self.login_url else {
            tracing::warn!("login_url not configured, skipping login");
            return Ok(());
        };
        let Some((username, password)) = &self.credentials else {
            return Err(AppError::Fetch {
                url: login_url.clone(),
                message: "credentials not configured".to_string(),
            });
        };

        let check_url = login_url.replace("/login.php", "/login_check.php");
        let form = [
            (self.login_form.id_field.as_str(), username.as_str()),
            (self.login_form.pw_field.as_str(), password.as_str()),
            ("url", "/shop/"),
        ];
        session.post_form(&check_url, &form).await?;

        // The shop index bounces anonymous visitors back to login.php.
        let shop_url = self
            .base_url
            .join("/shop/")
            .map_err(|e| AppError::Validation(format!("cannot build shop url: {}", e)))?;
        let landing = session.get_page(&shop_url).await?;
        if Self::is_login_page(&landing.final_url) {
            return Err(AppError::Fetch {
                url: check_url,
                message: "login rejected, still redirected to login page".to_string(),
            });
        }

        tracing::info!(user = %username, "login ok");
        Ok(())
    }

    async fn fetch(&self, session: &HttpSession, url: &Url) -> Result<FetchedPage> {
        let page = session.get_page(url).await?;
        if Self::is_login_page(&page.final_url) {
            return Err(AppError::Fetch {
                url: url.to_string(),
                message: "not logged in, redirected to login page".to_string(),
            });
        }
        Ok(page)
    }

    fn parse(&self, target: &Target, page: &FetchedPage) -> Result<Product> {
        let document = Html::parse_document(&page.body);
        let (title_css, title_sel) = &self.selectors.title;
        let (price_css, price_sel) = &self.selectors.price;

        let title = document
            .select(title_sel)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
            .ok_or_else(|| AppError::ElementNotFound {
                selector: title_css.clone(),
            })?;

        let price = document
            .select(price_sel)
            .find_map(|el| {
                el.value()
                    .attr("value")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .or_else(|| Some(element_text(&el)).filter(|t| !t.is_empty()))
            })
            .ok_or_else(|| AppError::ElementNotFound {
                selector: price_css.clone(),
            })?;

        let description = self
            .selectors
            .description
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .map(|el| element_text(&el))
            .filter(|t| !t.is_empty());

        let url = page.requested_url.as_str();
        let mut product = Product::new(product_id_from_url(url), url);
        product.title = title;
        product.price = price;
        product.description = description;
        product.brand = self.table_value(&document, BRAND_HEADER);
        product.colors = self.table_list(&document, COLOR_HEADER);
        product.sizes = self.table_list(&document, SIZE_HEADER);
        product.image_urls = self.image_urls(&document);
        product.selling_price = target.selling_price;

        tracing::debug!(
            product_id = %product.id,
            brand = product.brand.as_deref().unwrap_or(""),
            sizes = product.sizes.len(),
            colors = product.colors.len(),
            images = product.image_urls.len(),
            "parsed product page"
        );
        Ok(product)
    }
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| AppError::Validation(format!("invalid CSS selector '{}': {:?}", css, e)))
}

fn compile_optional(css: &str) -> Result<Option<Selector>> {
    if css.trim().is_empty() {
        Ok(None)
    } else {
        compile(css).map(Some)
    }
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
