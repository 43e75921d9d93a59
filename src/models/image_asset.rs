use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Downloaded,
    Persisted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAsset {
    /// Owning product (back-reference only).
    pub product_id: String,
    pub source_url: String,
    /// 1-based position in the product's image list.
    pub position: usize,
    pub local_path: Option<PathBuf>,
    pub byte_size: u64,
    /// Hex SHA-256 of the stored bytes.
    pub content_hash: Option<String>,
    pub status: AssetStatus,
    /// True when the bytes came from the dedup index instead of the network.
    pub reused: bool,
}

impl ImageAsset {
    pub fn pending(
        product_id: impl Into<String>,
        source_url: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            source_url: source_url.into(),
            position,
            local_path: None,
            byte_size: 0,
            content_hash: None,
            status: AssetStatus::Pending,
            reused: false,
        }
    }

    pub fn mark_downloaded(&mut self, byte_size: u64, content_hash: String) {
        self.byte_size = byte_size;
        self.content_hash = Some(content_hash);
        self.status = AssetStatus::Downloaded;
    }

    pub fn mark_persisted(&mut self, path: PathBuf) {
        self.local_path = Some(path);
        self.status = AssetStatus::Persisted;
    }
}

/// A single image that could not be retrieved; never fatal on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageFailure {
    pub source_url: String,
    pub position: usize,
    pub message: String,
}

/// Outcome of collecting one product's images.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageCollection {
    pub assets: Vec<ImageAsset>,
    pub failures: Vec<ImageFailure>,
}

impl ImageCollection {
    pub fn downloaded_count(&self) -> usize {
        self.assets.iter().filter(|a| !a.reused).count()
    }

    pub fn reused_count(&self) -> usize {
        self.assets.iter().filter(|a| a.reused).count()
    }
}
