// run.rs — PipelineRun and StageRecord: one work item's trip through the stages.
//
// Serialized as the pipeline log file:
//
//   { "session_id": "...", "started": "...",
//     "agents": [ { "agent": "implement", "status": "completed",
//                   "started_at": "...", "completed_at": "...",
//                   "duration_seconds": 12.5, "message": "...",
//                   "tools_used": ["shell", "file_write"] } ] }

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Started => write!(f, "started"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One attempt at one stage. Closed (completed or failed) records are
/// never modified again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub agent: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Summary on completion, reason on failure.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// 1 for the first attempt at this stage in the run.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl StageRecord {
    pub fn is_open(&self) -> bool {
        self.status == StageStatus::Started
    }

    pub(crate) fn close(
        &mut self,
        status: StageStatus,
        message: Option<String>,
        tools_used: Vec<String>,
    ) {
        let now = Utc::now();
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = Some(elapsed);
        self.message = message;
        self.tools_used = tools_used;
    }
}

/// Result of diffing a run against the canonical sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Completeness {
    pub complete: bool,
    pub missing_stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub session_id: String,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub agents: Vec<StageRecord>,
}

impl PipelineRun {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started: Utc::now(),
            agents: Vec::new(),
        }
    }

    /// The open (started, not yet closed) record for `stage`, if any.
    pub fn open_record(&self, stage: Stage) -> Option<&StageRecord> {
        self.agents
            .iter()
            .rev()
            .find(|r| r.agent == stage && r.is_open())
    }

    pub(crate) fn open_record_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.agents
            .iter_mut()
            .rev()
            .find(|r| r.agent == stage && r.is_open())
    }

    pub fn has_completed(&self, stage: Stage) -> bool {
        self.agents
            .iter()
            .any(|r| r.agent == stage && r.status == StageStatus::Completed)
    }

    pub fn attempts(&self, stage: Stage) -> u32 {
        self.agents.iter().filter(|r| r.agent == stage).count() as u32
    }

    /// Canonical stages without a completed record, in order. Order of the
    /// records themselves is not checked.
    pub fn completeness(&self) -> Completeness {
        let missing_stages: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|stage| !self.has_completed(*stage))
            .collect();
        Completeness {
            complete: missing_stages.is_empty(),
            missing_stages,
        }
    }

    /// First canonical stage that has not completed.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| !self.has_completed(*stage))
    }

    /// Sum of closed record durations, retries included.
    pub fn total_duration_seconds(&self) -> f64 {
        self.agents.iter().filter_map(|r| r.duration_seconds).sum()
    }

    pub fn last_failure(&self, stage: Stage) -> Option<&StageRecord> {
        self.agents
            .iter()
            .rev()
            .find(|r| r.agent == stage && r.status == StageStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(stage: Stage) -> StageRecord {
        let mut record = StageRecord {
            agent: stage,
            status: StageStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            message: None,
            tools_used: vec![],
            attempt: 1,
        };
        record.close(StageStatus::Completed, Some("ok".into()), vec!["shell".into()]);
        record
    }

    #[test]
    fn completeness_lists_missing_stages_in_order() {
        let mut run = PipelineRun::new("run-1");
        run.agents.push(completed(Stage::Plan));
        run.agents.push(completed(Stage::Research));

        let c = run.completeness();
        assert!(!c.complete);
        assert_eq!(c.missing_stages.first(), Some(&Stage::Test));
        assert_eq!(c.missing_stages.len(), 6);
        assert_eq!(run.next_stage(), Some(Stage::Test));
    }

    #[test]
    fn all_stages_completed_is_complete() {
        let mut run = PipelineRun::new("run-1");
        for stage in Stage::ALL {
            run.agents.push(completed(stage));
        }
        assert!(run.completeness().complete);
        assert_eq!(run.next_stage(), None);
        assert!(run.total_duration_seconds() >= 0.0);
    }

    #[test]
    fn log_file_shape_round_trips() {
        let raw = r#"{
            "session_id": "s1",
            "started": "2026-01-01T00:00:00Z",
            "agents": [{
                "agent": "security-audit",
                "status": "failed",
                "started_at": "2026-01-01T00:00:00Z",
                "completed_at": "2026-01-01T00:00:05Z",
                "duration_seconds": 5.0,
                "message": "timed out",
                "tools_used": []
            }]
        }"#;
        let run: PipelineRun = serde_json::from_str(raw).unwrap();
        assert_eq!(run.agents[0].agent, Stage::SecurityAudit);
        assert_eq!(run.agents[0].attempt, 1);
        assert_eq!(
            run.last_failure(Stage::SecurityAudit).unwrap().message.as_deref(),
            Some("timed out")
        );
    }
}
