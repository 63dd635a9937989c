// error.rs — Error types for the persisted-store layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing a state file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but does not parse as the expected document.
    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The file was written by a newer schema than this build understands.
    #[error("state file {path} has schema version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// Failed to serialize a document before writing it.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the failure is about file contents rather than the filesystem.
    ///
    /// Callers with a fallback chain (checkpoints, consent store) use this to
    /// decide between "try the next source" and "surface the I/O error".
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt { .. } | StoreError::UnsupportedVersion { .. }
        )
    }
}
