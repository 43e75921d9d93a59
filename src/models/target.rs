use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::utils::error::Result;

/// One product to collect: a product page URL or a site-specific id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub identifier: String,
    /// Retail price to advertise, taken from the input sheet.
    pub selling_price: Option<i64>,
}

impl Target {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            selling_price: None,
        }
    }

    pub fn with_selling_price(mut self, price: i64) -> Self {
        self.selling_price = Some(price);
        self
    }
}

/// Raw input row: `url,selling_price`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TargetRow {
    #[validate(length(min = 1, message = "empty url"))]
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selling_price: String,
}

impl TargetRow {
    pub fn into_target(self) -> Option<Target> {
        let price = parse_price(&self.selling_price)?;
        Some(Target::new(self.url.trim()).with_selling_price(price))
    }
}

/// Parses a whole-won amount such as `12000`, `12,000` or `12,000원`.
pub fn parse_price(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('원')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Loads targets from a CSV with `url` and `selling_price` columns.
///
/// Rows with an empty url or an unreadable price are skipped with a warning,
/// so one bad line does not block the whole sheet.
pub fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut targets = Vec::new();
    for (index, record) in reader.deserialize::<TargetRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line, error = %e, "unreadable row, skipping");
                continue;
            }
        };
        if let Err(e) = row.validate() {
            tracing::warn!(line, error = %e, "invalid row, skipping");
            continue;
        }
        let raw_price = row.selling_price.clone();
        match row.into_target() {
            Some(target) => targets.push(target),
            None => {
                tracing::warn!(line, selling_price = %raw_price, "invalid selling_price, skipping")
            }
        }
    }

    Ok(targets)
}
