// error.rs — Error types for stage tracking.

use thiserror::Error;

use crate::stage::Stage;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("invalid run id '{0}'")]
    InvalidRunId(String),

    #[error("no pipeline run '{0}'")]
    UnknownRun(String),

    /// `complete`/`fail` without a matching `start`.
    #[error("stage {stage} was never started in run {run_id}")]
    NotStarted { run_id: String, stage: Stage },

    #[error("stage {stage} is already running in run {run_id}")]
    AlreadyRunning { run_id: String, stage: Stage },

    /// Completed records are closed for good.
    #[error("stage {stage} already completed in run {run_id}")]
    AlreadyCompleted { run_id: String, stage: Stage },

    #[error("pipeline log error: {0}")]
    Store(#[from] wp_store::StoreError),
}
