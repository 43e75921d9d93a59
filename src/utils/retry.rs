//! Retry with exponential backoff for transient HTTP failures.
//!
//! Only errors for which [`AppError::is_transient`] holds are retried; a 404,
//! a parse failure or a login redirect is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;

use super::error::{AppError, Result};

/// Retry budget shared by page fetches and image downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every following one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Delay schedule: `base`, `2 * base`, `4 * base`, ...
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_retries)
            .map(|attempt| self.base_delay.saturating_mul(1u32 << attempt.min(16)))
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000)
    }
}

/// Runs `operation` until it succeeds, fails permanently or the policy's
/// retries are spent. The last error is returned on exhaustion.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let max_retries = policy.max_retries;
    RetryIf::spawn(policy.delays(), operation, |err: &AppError| {
        attempt += 1;
        let retry = err.is_transient() && attempt <= max_retries;
        if retry {
            tracing::warn!(
                operation = label,
                attempt,
                max_retries,
                error = %err,
                "transient error, retrying after backoff"
            );
        }
        retry
    })
    .await
}
