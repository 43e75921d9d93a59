use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod collection_result;
pub mod image_asset;
pub mod message;
pub mod product;
pub mod target;

// Re-exports for convenience
pub use collection_result::*;
pub use image_asset::*;
pub use message::*;
pub use product::*;
pub use target::*;

// Common enums used across models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fetch,
    Parse,
    Image,
    Template,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Parse => "parse",
            FailureKind::Image => "image",
            FailureKind::Template => "template",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target pipeline stage.
///
/// `Pending → Scraping → ImageCollecting → Rendering → Done`, or `Failed`
/// from any of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Scraping,
    ImageCollecting,
    Rendering,
    Done,
    Failed,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetState::Done | TargetState::Failed)
    }
}

/// Identifier for one collection run, used in log spans and the summary.
pub fn generate_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}
