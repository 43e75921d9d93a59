pub mod error;
pub mod retry;

pub use error::{AppError, Result};
pub use retry::{RetryPolicy, retry_transient};
