use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FailureKind, ImageCollection, Product, RenderedMessage, TargetState};

/// Everything gathered for a target that made it through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectedProduct {
    pub product: Product,
    pub images: ImageCollection,
    /// `None` only under the best-effort message policy.
    pub message: Option<RenderedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// Stage the target was in when it failed.
    pub stage: TargetState,
    pub diagnostic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Done(Box<CollectedProduct>),
    Failed(FailureRecord),
}

/// Final record for one submitted target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionResult {
    pub target: String,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl CollectionResult {
    pub fn done(target: impl Into<String>, collected: CollectedProduct) -> Self {
        Self {
            target: target.into(),
            outcome: Outcome::Done(Box::new(collected)),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        target: impl Into<String>,
        kind: FailureKind,
        stage: TargetState,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            outcome: Outcome::Failed(FailureRecord {
                kind,
                stage,
                diagnostic: diagnostic.into(),
            }),
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled(target: impl Into<String>, stage: TargetState) -> Self {
        Self::failed(target, FailureKind::Cancelled, stage, "run cancelled before completion")
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, Outcome::Done(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Done(_) => None,
            Outcome::Failed(record) => Some(record.kind),
        }
    }

    pub fn collected(&self) -> Option<&CollectedProduct> {
        match &self.outcome {
            Outcome::Done(collected) => Some(collected),
            Outcome::Failed(_) => None,
        }
    }

    /// Product id when known, else the raw target identifier.
    pub fn label(&self) -> &str {
        match &self.outcome {
            Outcome::Done(collected) => &collected.product.id,
            Outcome::Failed(_) => &self.target,
        }
    }

    pub fn state(&self) -> TargetState {
        if self.is_done() {
            TargetState::Done
        } else {
            TargetState::Failed
        }
    }
}
