// error.rs — Error types for checkpoints and batch coordination.

use std::path::PathBuf;

use thiserror::Error;
use wp_pipeline::Stage;

/// Errors from saving or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint for batch {batch_id}")]
    NotFound { batch_id: String },

    /// Checkpoint files exist but none of them parse.
    #[error("checkpoints for batch {batch_id} are corrupt: {reason}")]
    Corrupt { batch_id: String, reason: String },

    /// A snapshot would move `current_index` backwards.
    #[error("refusing to save batch {batch_id} at index {attempted}: latest checkpoint is at {latest}")]
    Regression {
        batch_id: String,
        latest: usize,
        attempted: usize,
    },

    #[error("invalid batch id '{0}'")]
    InvalidBatchId(String),

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] wp_store::StoreError),
}

impl CheckpointError {
    /// NotFound and Corrupt are recoverable through the fallback chain.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CheckpointError::NotFound { .. } | CheckpointError::Corrupt { .. }
        )
    }
}

/// Errors from driving a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Stage(#[from] wp_pipeline::StageError),

    #[error("invalid transition from {from} to {to} for batch {batch_id}")]
    InvalidTransition {
        batch_id: String,
        from: String,
        to: String,
    },

    #[error("current_index cannot move backwards ({from} -> {to})")]
    IndexRegression { from: usize, to: usize },

    #[error("work item index {index} out of range (batch has {total})")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("no batch loaded; submit or resume one first")]
    NoActiveBatch,

    #[error("no recoverable state for batch {0}")]
    UnknownBatch(String),

    #[error("a batch needs at least one work item")]
    EmptyBatch,

    #[error("batch {batch_id} is already {status}")]
    AlreadyFinished { batch_id: String, status: String },

    /// The executor asked to stop. State is saved at the last boundary.
    #[error("batch {batch_id} interrupted at item {index}, stage {stage}")]
    Interrupted {
        batch_id: String,
        index: usize,
        stage: Stage,
    },

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
