// events.rs — Batch lifecycle events and notification dispatch.
//
// The coordinator emits a BatchEvent at every boundary it crosses (item
// start, stage outcome, item outcome, resume, fallback). Sinks decide what
// to do with them; LogSink appends JSONL to `.waypoint/events.jsonl`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wp_pipeline::Stage;

use crate::error::BatchError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchSubmitted {
        batch_id: String,
        total_items: usize,
        timestamp: DateTime<Utc>,
    },

    ItemStarted {
        batch_id: String,
        index: usize,
        description: String,
        run_id: String,
        timestamp: DateTime<Utc>,
    },

    StageCompleted {
        batch_id: String,
        index: usize,
        stage: Stage,
        duration_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// One failed attempt. `will_retry` is false once the limit is reached.
    StageFailed {
        batch_id: String,
        index: usize,
        stage: Stage,
        attempt: u32,
        reason: String,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },

    ItemCompleted {
        batch_id: String,
        index: usize,
        timestamp: DateTime<Utc>,
    },

    ItemFailed {
        batch_id: String,
        index: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    BatchResumed {
        batch_id: String,
        next_index: Option<usize>,
        next_stage: Option<Stage>,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Recovery had to skip a checkpoint or fall back to another source.
    RecoveryFallback {
        batch_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    BatchFinished {
        batch_id: String,
        completed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    BatchAborted {
        batch_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    pub fn event_type(&self) -> &str {
        match self {
            BatchEvent::BatchSubmitted { .. } => "batch_submitted",
            BatchEvent::ItemStarted { .. } => "item_started",
            BatchEvent::StageCompleted { .. } => "stage_completed",
            BatchEvent::StageFailed { .. } => "stage_failed",
            BatchEvent::ItemCompleted { .. } => "item_completed",
            BatchEvent::ItemFailed { .. } => "item_failed",
            BatchEvent::BatchResumed { .. } => "batch_resumed",
            BatchEvent::RecoveryFallback { .. } => "recovery_fallback",
            BatchEvent::BatchFinished { .. } => "batch_finished",
            BatchEvent::BatchAborted { .. } => "batch_aborted",
        }
    }

    pub fn batch_id(&self) -> &str {
        match self {
            BatchEvent::BatchSubmitted { batch_id, .. }
            | BatchEvent::ItemStarted { batch_id, .. }
            | BatchEvent::StageCompleted { batch_id, .. }
            | BatchEvent::StageFailed { batch_id, .. }
            | BatchEvent::ItemCompleted { batch_id, .. }
            | BatchEvent::ItemFailed { batch_id, .. }
            | BatchEvent::BatchResumed { batch_id, .. }
            | BatchEvent::RecoveryFallback { batch_id, .. }
            | BatchEvent::BatchFinished { batch_id, .. }
            | BatchEvent::BatchAborted { batch_id, .. } => batch_id,
        }
    }

    pub fn submitted(batch_id: &str, total_items: usize) -> Self {
        BatchEvent::BatchSubmitted {
            batch_id: batch_id.to_string(),
            total_items,
            timestamp: Utc::now(),
        }
    }

    pub fn item_failed(batch_id: &str, index: usize, reason: &str) -> Self {
        BatchEvent::ItemFailed {
            batch_id: batch_id.to_string(),
            index,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn fallback(batch_id: &str, reason: &str) -> Self {
        BatchEvent::RecoveryFallback {
            batch_id: batch_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives batch events.
///
/// A sink that fails returns an error; the dispatcher logs it and moves on,
/// so a broken sink can never stop or stall a batch. `Send` lets the
/// coordinator be handed to another thread along with its sinks.
pub trait NotificationSink: Send {
    /// Deliver one event.
    fn send(&self, event: &BatchEvent) -> Result<(), BatchError>;
}

/// Appends events as JSONL to a file (`.waypoint/events.jsonl` by default).
///
/// The file is opened per event rather than held open, so an operator can
/// rotate or truncate it between events.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    /// A sink writing to `path`; the file and its directory are created on
    /// the first event.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &BatchEvent) -> Result<(), BatchError> {
        // The state directory may not exist yet on a fresh project.
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| BatchError::IoError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Append only; earlier events are never rewritten.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| BatchError::IoError {
                path: self.path.clone(),
                source,
            })?;

        // One compact JSON object per line.
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| BatchError::IoError {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Fans events out to every registered sink.
///
/// The coordinator owns one dispatcher and calls `dispatch` at each
/// checkpoint boundary; with no sinks registered, events only reach the
/// `tracing` output.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// A dispatcher with no sinks.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Register a sink. Sinks receive events in registration order.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Deliver `event` to every sink, logging (not propagating) sink errors.
    pub fn dispatch(&self, event: &BatchEvent) {
        tracing::debug!(event = event.event_type(), batch_id = %event.batch_id(), "batch event");
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Read back a JSONL event log, skipping lines that do not parse.
pub fn read_event_log(path: &Path) -> Result<Vec<BatchEvent>, BatchError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|source| BatchError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping malformed event line: {}", e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_string(&BatchEvent::submitted("b1", 3)).unwrap();
        assert!(json.contains("\"event_type\":\"batch_submitted\""));
        let back: BatchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "batch_submitted");
        assert_eq!(back.batch_id(), "b1");
    }

    #[test]
    fn log_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = LogSink::new(&path);
        sink.send(&BatchEvent::submitted("b1", 2)).unwrap();
        sink.send(&BatchEvent::item_failed("b1", 1, "tests red")).unwrap();

        let events = read_event_log(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type(), "item_failed");
    }

    #[test]
    fn dispatcher_reaches_every_sink() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(LogSink::new(&a)));
        dispatcher.add_sink(Box::new(LogSink::new(&b)));

        dispatcher.dispatch(&BatchEvent::fallback("b1", "checkpoint 3 corrupt"));

        assert!(fs::read_to_string(&a).unwrap().contains("recovery_fallback"));
        assert!(fs::read_to_string(&b).unwrap().contains("recovery_fallback"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&BatchEvent::submitted("b1", 1)).unwrap();
        fs::write(&path, format!("{}\nnot json\n", good)).unwrap();
        assert_eq!(read_event_log(&path).unwrap().len(), 1);
    }
}
