// tracker.rs — StageTracker: start/complete/fail events per pipeline run.
//
// Records are append-only: a retry after a failure adds a new record rather
// than reopening the failed one. When a log directory is configured, the run
// is rewritten atomically to `<log_dir>/<run_id>.json` after every event, so
// a separate process (or a restart) sees the same history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::error::StageError;
use crate::run::{Completeness, PipelineRun, StageRecord, StageStatus};
use crate::stage::Stage;

pub struct StageTracker {
    log_dir: Option<PathBuf>,
    runs: HashMap<String, PipelineRun>,
}

impl StageTracker {
    /// Tracker that mirrors every run into `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: Some(log_dir.into()),
            runs: HashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            log_dir: None,
            runs: HashMap::new(),
        }
    }

    /// A fresh run identifier.
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn log_path(&self, run_id: &str) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", run_id)))
    }

    /// Record the start of `stage`. Creates the run on first use.
    pub fn start(&mut self, run_id: &str, stage: Stage) -> Result<StageRecord, StageError> {
        let run = self.run_entry(run_id, true)?;
        if run.has_completed(stage) {
            return Err(StageError::AlreadyCompleted {
                run_id: run_id.to_string(),
                stage,
            });
        }
        if run.open_record(stage).is_some() {
            return Err(StageError::AlreadyRunning {
                run_id: run_id.to_string(),
                stage,
            });
        }

        let record = StageRecord {
            agent: stage,
            status: StageStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            message: None,
            tools_used: Vec::new(),
            attempt: run.attempts(stage) + 1,
        };
        run.agents.push(record.clone());
        tracing::debug!(run_id = %run_id, stage = %stage, attempt = record.attempt, "stage started");
        self.persist(run_id)?;
        Ok(record)
    }

    pub fn complete(
        &mut self,
        run_id: &str,
        stage: Stage,
        summary: impl Into<String>,
        tools_used: Vec<String>,
    ) -> Result<StageRecord, StageError> {
        let record = self.close(run_id, stage, StageStatus::Completed, summary.into(), tools_used)?;
        tracing::info!(
            run_id = %run_id,
            stage = %stage,
            seconds = record.duration_seconds.unwrap_or_default(),
            "stage completed"
        );
        Ok(record)
    }

    pub fn fail(
        &mut self,
        run_id: &str,
        stage: Stage,
        reason: impl Into<String>,
    ) -> Result<StageRecord, StageError> {
        let reason = reason.into();
        let record = self.close(run_id, stage, StageStatus::Failed, reason.clone(), Vec::new())?;
        tracing::warn!(run_id = %run_id, stage = %stage, attempt = record.attempt, "stage failed: {}", reason);
        Ok(record)
    }

    /// Like `fail`, keeping the tools the attempt used.
    pub fn fail_with_tools(
        &mut self,
        run_id: &str,
        stage: Stage,
        reason: impl Into<String>,
        tools_used: Vec<String>,
    ) -> Result<StageRecord, StageError> {
        let reason = reason.into();
        let record = self.close(run_id, stage, StageStatus::Failed, reason.clone(), tools_used)?;
        tracing::warn!(run_id = %run_id, stage = %stage, attempt = record.attempt, "stage failed: {}", reason);
        Ok(record)
    }

    pub fn completeness(&mut self, run_id: &str) -> Result<Completeness, StageError> {
        Ok(self.run_entry(run_id, false)?.completeness())
    }

    pub fn next_stage(&mut self, run_id: &str) -> Result<Option<Stage>, StageError> {
        Ok(self.run_entry(run_id, false)?.next_stage())
    }

    /// The run, loading it from the log directory if needed.
    pub fn run(&mut self, run_id: &str) -> Result<&PipelineRun, StageError> {
        Ok(&*self.run_entry(run_id, false)?)
    }

    /// Read a run straight from a pipeline log file.
    pub fn read_log(path: &Path) -> Result<Option<PipelineRun>, StageError> {
        Ok(wp_store::read_json(path)?)
    }

    fn close(
        &mut self,
        run_id: &str,
        stage: Stage,
        status: StageStatus,
        message: String,
        tools_used: Vec<String>,
    ) -> Result<StageRecord, StageError> {
        let run = self.run_entry(run_id, false)?;
        let completed = run.has_completed(stage);
        let Some(record) = run.open_record_mut(stage) else {
            return Err(if completed {
                StageError::AlreadyCompleted {
                    run_id: run_id.to_string(),
                    stage,
                }
            } else {
                StageError::NotStarted {
                    run_id: run_id.to_string(),
                    stage,
                }
            });
        };
        record.close(status, Some(message), tools_used);
        let record = record.clone();
        self.persist(run_id)?;
        Ok(record)
    }

    fn run_entry(&mut self, run_id: &str, create: bool) -> Result<&mut PipelineRun, StageError> {
        validate_run_id(run_id)?;
        if !self.runs.contains_key(run_id) {
            let loaded = match self.log_path(run_id) {
                Some(path) => wp_store::read_json::<PipelineRun>(&path)?,
                None => None,
            };
            let run = match loaded {
                Some(run) => run,
                None if create => PipelineRun::new(run_id),
                None => return Err(StageError::UnknownRun(run_id.to_string())),
            };
            self.runs.insert(run_id.to_string(), run);
        }
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| StageError::UnknownRun(run_id.to_string()))
    }

    fn persist(&self, run_id: &str) -> Result<(), StageError> {
        if let (Some(path), Some(run)) = (self.log_path(run_id), self.runs.get(run_id)) {
            wp_store::write_json(&path, run)?;
        }
        Ok(())
    }
}

fn validate_run_id(run_id: &str) -> Result<(), StageError> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(StageError::InvalidRunId(run_id.to_string()))
    }
}
