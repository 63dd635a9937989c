// error.rs — Error types for the consent store.

use thiserror::Error;

/// Errors that can occur while loading or persisting consent decisions.
#[derive(Debug, Error)]
pub enum ConsentError {
    /// Reading or writing the consent file failed.
    #[error("consent store error: {0}")]
    Store(#[from] wp_store::StoreError),

    /// The breaker threshold must be at least one denial.
    #[error("circuit breaker threshold must be greater than zero")]
    InvalidThreshold,
}
