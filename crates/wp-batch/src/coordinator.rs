// coordinator.rs — BatchCoordinator: drive work items through the stages.
//
// One item at a time, one stage at a time. Every visible tool action a stage
// takes goes through the AuthorizationPipeline via StageContext::authorize.
// The checkpoint is written at each boundary (end of a stage, end of an
// item), so an interruption loses at most the stage that was running.
//
// A failed stage is retried up to `retry_limit` attempts per session; after
// that the item is marked failed and the batch moves on.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use wp_authz::{AuthorizationOutcome, AuthorizationPipeline};
use wp_config::WaypointConfig;
use wp_pipeline::{Stage, StageTracker};
use wp_policy::ToolAction;

use crate::checkpoint::{CheckpointManager, RecoverySource};
use crate::error::BatchError;
use crate::events::{BatchEvent, EventDispatcher, LogSink};
use crate::state::{BatchState, BatchStatus, ItemStatus, WorkItem};

/// Why a stage did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    /// Counted against the retry limit.
    Failed(String),
    /// Stop the batch now; resume later from the last checkpoint.
    Interrupted,
}

impl StageFailure {
    pub fn failed(reason: impl Into<String>) -> Self {
        StageFailure::Failed(reason.into())
    }
}

/// What a stage gets to work with.
pub struct StageContext<'a> {
    stage: Stage,
    run_id: &'a str,
    pipeline: &'a mut AuthorizationPipeline,
    deadline: Instant,
    tools_used: Vec<String>,
    outcomes: Vec<AuthorizationOutcome>,
}

impl<'a> StageContext<'a> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run_id(&self) -> &str {
        self.run_id
    }

    /// Ask the pipeline whether `action` may proceed. The caller identity is
    /// the stage name. Allowed tools are recorded on the stage record.
    pub fn authorize(&mut self, action: &ToolAction) -> AuthorizationOutcome {
        let outcome = self.pipeline.authorize(self.stage.as_str(), action);
        if outcome.decision.is_safe() {
            let tool = action.tool_name().to_string();
            if !self.tools_used.contains(&tool) {
                self.tools_used.push(tool);
            }
        }
        self.outcomes.push(outcome.clone());
        outcome
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Every authorization decision made so far in this attempt.
    pub fn outcomes(&self) -> &[AuthorizationOutcome] {
        &self.outcomes
    }
}

/// Runs one stage of one work item.
///
/// Returns a short summary on success. Implementations should check
/// `ctx.deadline_passed()` between steps; an attempt that returns after the
/// deadline is recorded as failed regardless of its result.
pub trait StageExecutor {
    fn run_stage(
        &mut self,
        item: &WorkItem,
        ctx: &mut StageContext<'_>,
    ) -> Result<String, StageFailure>;
}

/// Where a resumed batch will pick up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub next_index: Option<usize>,
    pub next_stage: Option<Stage>,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub source: RecoverySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: BatchStatus,
    pub current_index: usize,
    pub completed: Vec<usize>,
    pub failed: Vec<usize>,
}

impl BatchSummary {
    fn of(state: &BatchState) -> Self {
        Self {
            batch_id: state.batch_id.clone(),
            status: state.status,
            current_index: state.current_index(),
            completed: state.completed().iter().copied().collect(),
            failed: state.failed().iter().copied().collect(),
        }
    }
}

enum ItemOutcome {
    Completed,
    Failed(String),
}

pub struct BatchCoordinator {
    checkpoints: CheckpointManager,
    tracker: StageTracker,
    pipeline: AuthorizationPipeline,
    events: EventDispatcher,
    retry_limit: u32,
    stage_timeout: Duration,
    state: Option<BatchState>,
}

impl BatchCoordinator {
    pub fn new(
        checkpoints: CheckpointManager,
        tracker: StageTracker,
        pipeline: AuthorizationPipeline,
    ) -> Self {
        Self {
            checkpoints,
            tracker,
            pipeline,
            events: EventDispatcher::new(),
            retry_limit: wp_config::DEFAULT_STAGE_RETRY_LIMIT,
            stage_timeout: Duration::from_secs(wp_config::DEFAULT_STAGE_TIMEOUT_SECS),
            state: None,
        }
    }

    /// Coordinator wired to the project's `.waypoint/` layout.
    pub fn from_config(config: &WaypointConfig, pipeline: AuthorizationPipeline) -> Self {
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir, config.checkpoint_retention)
            .with_state_file(&config.batch_state_file);
        let mut events = EventDispatcher::new();
        events.add_sink(Box::new(LogSink::new(&config.events_log)));
        Self::new(checkpoints, StageTracker::new(&config.pipeline_log_dir), pipeline)
            .with_events(events)
            .with_retry_limit(config.stage_retry_limit)
            .with_stage_timeout(config.stage_timeout)
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn state(&self) -> Option<&BatchState> {
        self.state.as_ref()
    }

    /// Start tracking a new batch. The initial checkpoint is written before
    /// this returns.
    pub fn submit(
        &mut self,
        batch_id: Option<String>,
        descriptions: Vec<String>,
    ) -> Result<BatchSummary, BatchError> {
        if descriptions.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        let batch_id = batch_id.unwrap_or_else(|| format!("batch-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        let state = BatchState::new(batch_id, descriptions);
        self.checkpoints.save(&state)?;
        tracing::info!(batch_id = %state.batch_id, items = state.total_items(), "batch submitted");
        self.events
            .dispatch(&BatchEvent::submitted(&state.batch_id, state.total_items()));
        let summary = BatchSummary::of(&state);
        self.state = Some(state);
        Ok(summary)
    }

    /// Load the batch from disk and report where it will pick up.
    pub fn resume(&mut self, batch_id: &str) -> Result<ResumeReport, BatchError> {
        let recovery = self.checkpoints.recover(batch_id)?;
        for note in &recovery.fallbacks {
            self.events.dispatch(&BatchEvent::fallback(batch_id, note));
        }

        let state = match recovery.state {
            Some(state) => state,
            None => match self.state.take() {
                // Submitted in this process but nothing persisted: start over.
                Some(known) if known.batch_id == batch_id => {
                    BatchState::new(batch_id, known.items.into_iter().map(|i| i.description).collect())
                }
                _ => return Err(BatchError::UnknownBatch(batch_id.to_string())),
            },
        };

        let next_index = state.next_item().map(|item| item.index);
        let next_stage = match (next_index, state.current_run_id()) {
            (None, _) => None,
            (Some(_), None) => Some(Stage::Research),
            (Some(_), Some(run_id)) => match self.tracker.next_stage(run_id) {
                Ok(stage) => stage,
                Err(wp_pipeline::StageError::UnknownRun(_)) => Some(Stage::Research),
                Err(e) => return Err(e.into()),
            },
        };

        let report = ResumeReport {
            batch_id: state.batch_id.clone(),
            status: state.status,
            next_index,
            next_stage,
            completed: state.completed().len(),
            failed: state.failed().len(),
            total: state.total_items(),
            source: recovery.source,
        };
        tracing::info!(
            batch_id = %report.batch_id,
            next_index = ?report.next_index,
            next_stage = ?report.next_stage,
            source = %report.source,
            "batch resumed"
        );
        self.events.dispatch(&BatchEvent::BatchResumed {
            batch_id: report.batch_id.clone(),
            next_index,
            next_stage,
            source: report.source.to_string(),
            timestamp: Utc::now(),
        });
        self.state = Some(state);
        Ok(report)
    }

    /// Run the loaded batch to the end.
    pub fn run(&mut self, executor: &mut dyn StageExecutor) -> Result<BatchSummary, BatchError> {
        let state = self.state.as_mut().ok_or(BatchError::NoActiveBatch)?;
        if state.status.is_terminal() {
            return Err(BatchError::AlreadyFinished {
                batch_id: state.batch_id.clone(),
                status: state.status.to_string(),
            });
        }
        if state.status == BatchStatus::NotStarted {
            state.transition(BatchStatus::InProgress)?;
        }

        loop {
            let state = self.state.as_mut().ok_or(BatchError::NoActiveBatch)?;
            let Some(item) = state.next_item().cloned() else {
                break;
            };
            let run_id = match state.current_run_id() {
                Some(id) => id.to_string(),
                None => StageTracker::new_run_id(),
            };
            state.start_current(run_id.clone())?;
            self.checkpoints.save(state)?;
            let batch_id = state.batch_id.clone();
            tracing::info!(batch_id = %batch_id, index = item.index, run_id = %run_id, "item started");
            self.events.dispatch(&BatchEvent::ItemStarted {
                batch_id: batch_id.clone(),
                index: item.index,
                description: item.description.clone(),
                run_id: run_id.clone(),
                timestamp: Utc::now(),
            });

            let outcome = self.run_item(executor, &batch_id, &item, &run_id)?;

            let state = self.state.as_mut().ok_or(BatchError::NoActiveBatch)?;
            match outcome {
                ItemOutcome::Completed => {
                    state.close_current(ItemStatus::Completed)?;
                    self.checkpoints.save(state)?;
                    tracing::info!(batch_id = %batch_id, index = item.index, "item completed");
                    self.events.dispatch(&BatchEvent::ItemCompleted {
                        batch_id: batch_id.clone(),
                        index: item.index,
                        timestamp: Utc::now(),
                    });
                }
                ItemOutcome::Failed(reason) => {
                    state.close_current(ItemStatus::Failed)?;
                    self.checkpoints.save(state)?;
                    tracing::warn!(batch_id = %batch_id, index = item.index, "item failed: {}", reason);
                    self.events
                        .dispatch(&BatchEvent::item_failed(&batch_id, item.index, &reason));
                }
            }
        }

        let state = self.state.as_mut().ok_or(BatchError::NoActiveBatch)?;
        state.transition(BatchStatus::Completed)?;
        self.checkpoints.save(state)?;
        self.events.dispatch(&BatchEvent::BatchFinished {
            batch_id: state.batch_id.clone(),
            completed: state.completed().len(),
            failed: state.failed().len(),
            timestamp: Utc::now(),
        });
        Ok(BatchSummary::of(state))
    }

    /// Stop the loaded batch for good.
    pub fn abort(&mut self, reason: &str) -> Result<BatchSummary, BatchError> {
        let state = self.state.as_mut().ok_or(BatchError::NoActiveBatch)?;
        state.transition(BatchStatus::Aborted)?;
        self.checkpoints.save(state)?;
        tracing::warn!(batch_id = %state.batch_id, "batch aborted: {}", reason);
        self.events.dispatch(&BatchEvent::BatchAborted {
            batch_id: state.batch_id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(BatchSummary::of(state))
    }

    fn run_item(
        &mut self,
        executor: &mut dyn StageExecutor,
        batch_id: &str,
        item: &WorkItem,
        run_id: &str,
    ) -> Result<ItemOutcome, BatchError> {
        for stage in Stage::ALL {
            let run = match self.tracker.run(run_id) {
                Ok(run) => Some(run),
                Err(wp_pipeline::StageError::UnknownRun(_)) => None,
                Err(e) => return Err(e.into()),
            };
            if run.is_some_and(|r| r.has_completed(stage)) {
                continue;
            }
            // Left open by an interrupted session.
            if run.is_some_and(|r| r.open_record(stage).is_some()) {
                self.tracker.fail(run_id, stage, "interrupted before completion")?;
            }

            let mut attempts = 0;
            loop {
                attempts += 1;
                self.tracker.start(run_id, stage)?;
                let started = Instant::now();
                let mut ctx = StageContext {
                    stage,
                    run_id,
                    pipeline: &mut self.pipeline,
                    deadline: started + self.stage_timeout,
                    tools_used: Vec::new(),
                    outcomes: Vec::new(),
                };
                let mut result = executor.run_stage(item, &mut ctx);
                let tools_used = ctx.tools_used;

                if result.is_ok() && started.elapsed() > self.stage_timeout {
                    result = Err(StageFailure::failed(format!(
                        "exceeded time budget of {}s",
                        self.stage_timeout.as_secs()
                    )));
                }

                match result {
                    Ok(summary) => {
                        let record = self.tracker.complete(run_id, stage, summary, tools_used)?;
                        self.save_current()?;
                        self.events.dispatch(&BatchEvent::StageCompleted {
                            batch_id: batch_id.to_string(),
                            index: item.index,
                            stage,
                            duration_seconds: record.duration_seconds.unwrap_or_default(),
                            timestamp: Utc::now(),
                        });
                        break;
                    }
                    Err(StageFailure::Interrupted) => {
                        tracing::warn!(batch_id = %batch_id, index = item.index, stage = %stage, "batch interrupted");
                        return Err(BatchError::Interrupted {
                            batch_id: batch_id.to_string(),
                            index: item.index,
                            stage,
                        });
                    }
                    Err(StageFailure::Failed(reason)) => {
                        let record =
                            self.tracker
                                .fail_with_tools(run_id, stage, reason.clone(), tools_used)?;
                        let will_retry = attempts < self.retry_limit;
                        self.save_current()?;
                        self.events.dispatch(&BatchEvent::StageFailed {
                            batch_id: batch_id.to_string(),
                            index: item.index,
                            stage,
                            attempt: record.attempt,
                            reason: reason.clone(),
                            will_retry,
                            timestamp: Utc::now(),
                        });
                        if !will_retry {
                            return Ok(ItemOutcome::Failed(format!(
                                "stage {} failed after {} attempt(s): {}",
                                stage, attempts, reason
                            )));
                        }
                    }
                }
            }
        }

        let completeness = self.tracker.completeness(run_id)?;
        if completeness.complete {
            Ok(ItemOutcome::Completed)
        } else {
            let missing: Vec<&str> = completeness.missing_stages.iter().map(|s| s.as_str()).collect();
            Ok(ItemOutcome::Failed(format!("missing stages: {}", missing.join(", "))))
        }
    }

    fn save_current(&self) -> Result<(), BatchError> {
        if let Some(state) = &self.state {
            self.checkpoints.save(state)?;
        }
        Ok(())
    }
}
