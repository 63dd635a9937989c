// checkpoint.rs — CheckpointManager: durable, versioned snapshots of BatchState.
//
// Layout:
//   <checkpoint_dir>/<batch_id>/checkpoint-000001.json
//   <checkpoint_dir>/<batch_id>/checkpoint-000002.json   (newest wins)
//
// Every save writes a new sequence-numbered file through wp-store's atomic
// write, then prunes down to the newest `retention` files. A single batch
// state file is mirrored alongside for tools that only read that format.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wp_store::Versioned;

use crate::error::CheckpointError;
use crate::state::{BatchState, BatchStatus};

const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".json";

/// One persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub version: u32,
    pub batch_id: String,
    pub current_feature_index: usize,
    pub total_features: usize,
    #[serde(default)]
    pub completed_features: Vec<usize>,
    #[serde(default)]
    pub failed_features: Vec<usize>,
    pub features: Vec<String>,
    pub saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<String>,
    /// Absent in older snapshots; derived from the index when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
}

impl Versioned for Checkpoint {
    const SCHEMA_VERSION: u32 = 1;
}

impl Checkpoint {
    pub fn from_state(state: &BatchState) -> Self {
        Self {
            version: Self::SCHEMA_VERSION,
            batch_id: state.batch_id.clone(),
            current_feature_index: state.current_index(),
            total_features: state.total_items(),
            completed_features: state.completed().iter().copied().collect(),
            failed_features: state.failed().iter().copied().collect(),
            features: state.items.iter().map(|i| i.description.clone()).collect(),
            saved_at: Utc::now(),
            current_run_id: state.current_run_id().map(str::to_string),
            status: Some(state.status),
        }
    }

    /// Internal consistency; a file that parses but fails this is corrupt.
    fn check(&self) -> Result<(), String> {
        if self.features.len() != self.total_features {
            return Err(format!(
                "total_features is {} but {} features are listed",
                self.total_features,
                self.features.len()
            ));
        }
        if self.current_feature_index > self.total_features {
            return Err(format!(
                "current_feature_index {} is past the end ({})",
                self.current_feature_index, self.total_features
            ));
        }
        if let Some(bad) = self
            .completed_features
            .iter()
            .chain(&self.failed_features)
            .find(|i| **i >= self.total_features)
        {
            return Err(format!("item index {} out of range", bad));
        }
        Ok(())
    }

    pub fn into_state(self) -> BatchState {
        let status = self.status.unwrap_or_else(|| {
            derive_status(self.current_feature_index, self.total_features)
        });
        BatchState::restore(
            self.batch_id,
            self.features,
            self.current_feature_index,
            self.completed_features,
            self.failed_features,
            self.current_run_id,
            status,
        )
    }
}

fn derive_status(current_index: usize, total: usize) -> BatchStatus {
    if current_index == 0 {
        BatchStatus::NotStarted
    } else if current_index >= total {
        BatchStatus::Completed
    } else {
        BatchStatus::InProgress
    }
}

/// The single-file batch state format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStateFile {
    pub batch_id: String,
    pub current_index: usize,
    pub total_items: usize,
    pub items: Vec<String>,
    #[serde(default)]
    pub status: Option<BatchStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<usize>,
}

impl BatchStateFile {
    pub fn from_state(state: &BatchState) -> Self {
        Self {
            batch_id: state.batch_id.clone(),
            current_index: state.current_index(),
            total_items: state.total_items(),
            items: state.items.iter().map(|i| i.description.clone()).collect(),
            status: Some(state.status),
            failed: state.failed().iter().copied().collect(),
        }
    }

    pub fn into_state(self) -> BatchState {
        let total = self.items.len();
        let status = self
            .status
            .unwrap_or_else(|| derive_status(self.current_index, total));
        BatchState::restore(
            self.batch_id,
            self.items,
            self.current_index,
            Vec::<usize>::new(),
            self.failed,
            None,
            status,
        )
    }
}

/// Where a recovered state came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoverySource {
    Checkpoint { path: PathBuf },
    StateFile { path: PathBuf },
    Fresh,
}

impl std::fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySource::Checkpoint { path } => write!(f, "checkpoint {}", path.display()),
            RecoverySource::StateFile { path } => write!(f, "batch state file {}", path.display()),
            RecoverySource::Fresh => write!(f, "fresh start"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub path: PathBuf,
    /// Newer files that were skipped because they did not parse.
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Recovery {
    /// `None` on a fresh start: nothing on disk describes the batch.
    pub state: Option<BatchState>,
    pub source: RecoverySource,
    /// Human-readable notes for every fallback taken.
    pub fallbacks: Vec<String>,
}

pub struct CheckpointManager {
    dir: PathBuf,
    retention: usize,
    state_file: Option<PathBuf>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
            state_file: None,
        }
    }

    /// Also mirror every save to `path` and fall back to it on recovery.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn batch_dir(&self, batch_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_batch_id(batch_id)?;
        Ok(self.dir.join(batch_id))
    }

    pub fn save(&self, state: &BatchState) -> Result<Checkpoint, CheckpointError> {
        let batch_dir = self.batch_dir(&state.batch_id)?;
        let files = list_checkpoints(&batch_dir)?;

        if let Some(latest) = newest_good(&files, &state.batch_id) {
            if state.current_index() < latest.current_feature_index {
                return Err(CheckpointError::Regression {
                    batch_id: state.batch_id.clone(),
                    latest: latest.current_feature_index,
                    attempted: state.current_index(),
                });
            }
        }

        let seq = files.last().map(|(seq, _)| seq + 1).unwrap_or(1);
        let path = batch_dir.join(checkpoint_file_name(seq));
        let checkpoint = Checkpoint::from_state(state);
        wp_store::write_json(&path, &checkpoint)?;
        tracing::debug!(
            batch_id = %state.batch_id,
            index = checkpoint.current_feature_index,
            path = %path.display(),
            "checkpoint saved"
        );

        if let Some(state_file) = &self.state_file {
            wp_store::write_json(state_file, &BatchStateFile::from_state(state))?;
        }

        self.prune(&batch_dir)?;
        Ok(checkpoint)
    }

    /// Newest checkpoint that parses. Corrupt files are skipped with a warning.
    pub fn load(&self, batch_id: &str) -> Result<LoadedCheckpoint, CheckpointError> {
        let batch_dir = self.batch_dir(batch_id)?;
        let files = list_checkpoints(&batch_dir)?;
        if files.is_empty() {
            return Err(CheckpointError::NotFound {
                batch_id: batch_id.to_string(),
            });
        }

        let mut skipped = Vec::new();
        for (_, path) in files.iter().rev() {
            match read_checkpoint(path, batch_id) {
                Ok(checkpoint) => {
                    return Ok(LoadedCheckpoint {
                        checkpoint,
                        path: path.clone(),
                        skipped,
                    })
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable checkpoint: {}", reason);
                    skipped.push(path.clone());
                }
            }
        }
        Err(CheckpointError::Corrupt {
            batch_id: batch_id.to_string(),
            reason: "no recoverable state".to_string(),
        })
    }

    /// Newest good checkpoint, then the batch state file, then nothing.
    pub fn recover(&self, batch_id: &str) -> Result<Recovery, CheckpointError> {
        let mut fallbacks = Vec::new();
        match self.load(batch_id) {
            Ok(loaded) => {
                for path in &loaded.skipped {
                    fallbacks.push(format!("skipped corrupt checkpoint {}", path.display()));
                }
                return Ok(Recovery {
                    state: Some(loaded.checkpoint.into_state()),
                    source: RecoverySource::Checkpoint { path: loaded.path },
                    fallbacks,
                });
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(batch_id = %batch_id, "checkpoint unavailable: {}", e);
                fallbacks.push(e.to_string());
            }
            Err(e) => return Err(e),
        }

        if let Some(path) = &self.state_file {
            match wp_store::read_json::<BatchStateFile>(path) {
                Ok(Some(file)) if file.batch_id == batch_id && file.items.len() == file.total_items => {
                    tracing::warn!(batch_id = %batch_id, path = %path.display(), "recovering from batch state file");
                    return Ok(Recovery {
                        state: Some(file.into_state()),
                        source: RecoverySource::StateFile { path: path.clone() },
                        fallbacks,
                    });
                }
                Ok(Some(file)) if file.batch_id != batch_id => {
                    fallbacks.push(format!(
                        "batch state file {} describes batch {}",
                        path.display(),
                        file.batch_id
                    ));
                }
                Ok(Some(_)) => {
                    fallbacks.push(format!(
                        "batch state file {} is inconsistent",
                        path.display()
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "batch state file unreadable: {}", e);
                    fallbacks.push(format!("batch state file unreadable: {}", e));
                }
            }
        }

        tracing::warn!(batch_id = %batch_id, "no saved state; starting fresh");
        Ok(Recovery {
            state: None,
            source: RecoverySource::Fresh,
            fallbacks,
        })
    }

    /// Sequence-ordered checkpoint files for a batch.
    pub fn list(&self, batch_id: &str) -> Result<Vec<PathBuf>, CheckpointError> {
        let batch_dir = self.batch_dir(batch_id)?;
        Ok(list_checkpoints(&batch_dir)?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    fn prune(&self, batch_dir: &Path) -> Result<(), CheckpointError> {
        let files = list_checkpoints(batch_dir)?;
        if files.len() <= self.retention {
            return Ok(());
        }
        let excess = files.len() - self.retention;
        for (_, path) in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to prune checkpoint: {}", e);
            }
        }
        Ok(())
    }
}

fn checkpoint_file_name(seq: u64) -> String {
    format!("{}{:06}{}", FILE_PREFIX, seq, FILE_SUFFIX)
}

fn parse_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

fn list_checkpoints(batch_dir: &Path) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
    if !batch_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(batch_dir).map_err(|source| CheckpointError::IoError {
        path: batch_dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CheckpointError::IoError {
            path: batch_dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(parse_sequence) {
            files.push((seq, entry.path()));
        }
    }
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

fn read_checkpoint(path: &Path, batch_id: &str) -> Result<Checkpoint, String> {
    let checkpoint = wp_store::read_versioned::<Checkpoint>(path)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "file disappeared".to_string())?;
    if checkpoint.batch_id != batch_id {
        return Err(format!("belongs to batch {}", checkpoint.batch_id));
    }
    checkpoint.check()?;
    Ok(checkpoint)
}

fn newest_good(files: &[(u64, PathBuf)], batch_id: &str) -> Option<Checkpoint> {
    files
        .iter()
        .rev()
        .find_map(|(_, path)| read_checkpoint(path, batch_id).ok())
}

fn validate_batch_id(batch_id: &str) -> Result<(), CheckpointError> {
    let ok = !batch_id.is_empty()
        && !batch_id.starts_with('.')
        && batch_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidBatchId(batch_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ItemStatus;
    use tempfile::tempdir;

    fn state(n: usize) -> BatchState {
        BatchState::new("batch-1", (0..n).map(|i| format!("feature {}", i)).collect())
    }

    fn complete_next(s: &mut BatchState) {
        s.start_current("run").unwrap();
        s.close_current(ItemStatus::Completed).unwrap();
    }

    #[test]
    fn save_then_load_returns_newest() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5);
        let mut s = state(3);
        mgr.save(&s).unwrap();
        complete_next(&mut s);
        mgr.save(&s).unwrap();

        let loaded = mgr.load("batch-1").unwrap();
        assert_eq!(loaded.checkpoint.current_feature_index, 1);
        assert_eq!(loaded.checkpoint.completed_features, vec![0]);
        assert!(loaded.path.ends_with("checkpoint-000002.json"));
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn missing_batch_is_not_found() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5);
        assert!(matches!(
            mgr.load("nope"),
            Err(CheckpointError::NotFound { .. })
        ));
    }

    #[test]
    fn truncated_newest_falls_back_to_previous() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5);
        let mut s = state(3);
        complete_next(&mut s);
        mgr.save(&s).unwrap();
        complete_next(&mut s);
        mgr.save(&s).unwrap();

        let newest = dir.path().join("batch-1").join("checkpoint-000002.json");
        fs::write(&newest, b"{\"version\":1,\"batch_id\":\"bat").unwrap();

        let loaded = mgr.load("batch-1").unwrap();
        assert_eq!(loaded.checkpoint.current_feature_index, 1);
        assert_eq!(loaded.skipped, vec![newest]);
    }

    #[test]
    fn all_corrupt_reports_no_recoverable_state() {
        let dir = tempdir().unwrap();
        let batch_dir = dir.path().join("batch-1");
        fs::create_dir_all(&batch_dir).unwrap();
        fs::write(batch_dir.join("checkpoint-000001.json"), b"garbage").unwrap();

        let mgr = CheckpointManager::new(dir.path(), 5);
        match mgr.load("batch-1") {
            Err(CheckpointError::Corrupt { reason, .. }) => {
                assert_eq!(reason, "no recoverable state")
            }
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn inconsistent_checkpoint_counts_as_corrupt() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5);
        mgr.save(&state(2)).unwrap();

        let mut bad = Checkpoint::from_state(&state(2));
        bad.current_feature_index = 9;
        let path = dir.path().join("batch-1").join("checkpoint-000002.json");
        wp_store::write_json(&path, &bad).unwrap();

        let loaded = mgr.load("batch-1").unwrap();
        assert!(loaded.path.ends_with("checkpoint-000001.json"));
    }

    #[test]
    fn regression_is_rejected() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 5);
        let mut s = state(3);
        complete_next(&mut s);
        complete_next(&mut s);
        mgr.save(&s).unwrap();

        let behind = state(3);
        assert!(matches!(
            mgr.save(&behind),
            Err(CheckpointError::Regression { latest: 2, attempted: 0, .. })
        ));
    }

    #[test]
    fn retention_keeps_newest_files() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), 2);
        let s = state(1);
        for _ in 0..4 {
            mgr.save(&s).unwrap();
        }
        let files = mgr.list("batch-1").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("checkpoint-000003.json"));
        assert!(files[1].ends_with("checkpoint-000004.json"));
    }

    #[test]
    fn recovery_falls_back_to_state_file_then_fresh() {
        let dir = tempdir().unwrap();
        let state_file = dir.path().join("batch_state.json");
        let legacy = BatchStateFile {
            batch_id: "batch-1".into(),
            current_index: 2,
            total_items: 3,
            items: vec!["a".into(), "b".into(), "c".into()],
            status: None,
            failed: vec![],
        };
        wp_store::write_json(&state_file, &legacy).unwrap();

        let mgr = CheckpointManager::new(dir.path().join("checkpoints"), 5)
            .with_state_file(&state_file);
        let recovery = mgr.recover("batch-1").unwrap();
        assert_eq!(recovery.source, RecoverySource::StateFile { path: state_file.clone() });
        let recovered = recovery.state.unwrap();
        assert_eq!(recovered.current_index(), 2);
        assert_eq!(recovered.completed().len(), 2);
        assert_eq!(recovered.status, BatchStatus::InProgress);
        assert!(!recovery.fallbacks.is_empty());

        let other = mgr.recover("batch-2").unwrap();
        assert_eq!(other.source, RecoverySource::Fresh);
        assert!(other.state.is_none());
    }

    #[test]
    fn save_mirrors_the_state_file() {
        let dir = tempdir().unwrap();
        let state_file = dir.path().join("batch_state.json");
        let mgr = CheckpointManager::new(dir.path().join("checkpoints"), 5)
            .with_state_file(&state_file);
        let mut s = state(2);
        complete_next(&mut s);
        mgr.save(&s).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&state_file).unwrap()).unwrap();
        assert_eq!(raw["batch_id"], "batch-1");
        assert_eq!(raw["current_index"], 1);
        assert_eq!(raw["total_items"], 2);
        assert_eq!(raw["items"][1], "feature 1");
    }

    #[test]
    fn batch_ids_cannot_escape_the_checkpoint_dir() {
        let mgr = CheckpointManager::new("/tmp/cp", 5);
        assert!(matches!(
            mgr.load("../x"),
            Err(CheckpointError::InvalidBatchId(_))
        ));
    }
}
