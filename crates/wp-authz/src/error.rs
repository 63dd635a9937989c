// error.rs — Error types for the authorization pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Internal failure of a layer. The pipeline never surfaces these to the
/// caller directly; a failing layer raises the final decision to at least
/// `NeedsApproval`.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("consent store unavailable: {0}")]
    Consent(#[from] wp_consent::ConsentError),

    #[error("audit log unavailable: {0}")]
    Audit(#[from] wp_audit::AuditError),

    #[error("failed to inspect {path}: {source}")]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("approval prompt failed: {0}")]
    Prompt(String),

    /// The layer could not be constructed at startup.
    #[error("{layer} layer unavailable: {reason}")]
    Unavailable { layer: String, reason: String },
}

/// Why the path/command validator rejected an action. Always maps to
/// `Blocked`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path traversal ('..') in {input:?}")]
    Traversal { input: String },

    #[error("percent-encoded path traversal in {input:?}")]
    EncodedTraversal { input: String },

    #[error("{path} resolves through a symlink to {resolved}, outside the workspace")]
    SymlinkEscape { path: PathBuf, resolved: PathBuf },

    #[error("null byte in {input:?}")]
    NullByte { input: String },

    #[error("shell metacharacter {metachar:?} in command {command:?}")]
    ShellInjection { metachar: String, command: String },
}
