// error.rs — Error types for policy loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a security policy.
#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    /// No policy file exists at the configured location.
    #[error("security policy not found at {path}")]
    NotFound { path: PathBuf },

    /// The policy file exists but cannot be read or parsed.
    #[error("security policy at {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A command or path pattern is not a valid glob.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
