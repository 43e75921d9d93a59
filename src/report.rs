//! Run summary and machine-readable result dump.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::models::{CollectionResult, Outcome};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

impl RunTotals {
    pub fn from_results(results: &[CollectionResult]) -> Self {
        let done = results.iter().filter(|r| r.is_done()).count();
        Self {
            total: results.len(),
            done,
            failed: results.len() - done,
        }
    }

    /// Process exit code: 0 when everything was collected, 1 when anything
    /// failed, 2 when there was nothing to do.
    pub fn exit_code(&self) -> i32 {
        if self.total == 0 {
            2
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

pub fn render_summary(results: &[CollectionResult], generated_at: DateTime<Local>) -> String {
    let totals = RunTotals::from_results(results);
    let mut lines = vec![
        format!("Run at: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
        format!(
            "Total: {}  Done: {}  Failed: {}",
            totals.total, totals.done, totals.failed
        ),
        String::new(),
        "--- done ---".to_string(),
    ];

    for result in results {
        if let Outcome::Done(collected) = &result.outcome {
            lines.push(format!(
                "  {} ({}) images={}",
                collected.product.id,
                collected.product.source_url,
                collected.images.assets.len()
            ));
        }
    }

    if totals.failed > 0 {
        lines.push(String::new());
        lines.push("--- failed ---".to_string());
        for result in results {
            if let Outcome::Failed(record) = &result.outcome {
                lines.push(format!("  [{}] {}", record.kind, record.diagnostic));
                lines.push(format!("    URL: {}", result.target));
            }
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Writes `summary.txt` (or the configured name) into `output_dir`.
pub async fn write_summary(
    output_dir: &Path,
    file_name: &str,
    results: &[CollectionResult],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(file_name);
    tokio::fs::write(&path, render_summary(results, Local::now())).await?;
    tracing::info!(path = %path.display(), "summary written");
    Ok(path)
}

pub async fn write_results_json(path: &Path, results: &[CollectionResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(results)?;
    tokio::fs::write(path, json).await?;
    tracing::info!(path = %path.display(), results = results.len(), "results written");
    Ok(())
}
