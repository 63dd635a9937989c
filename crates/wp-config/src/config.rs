// config.rs — WaypointConfig and its layered loading.
//
// Layout generated by `for_project()`:
//
//   <root>/.waypoint/
//     config.toml          optional overrides
//     policy.json          security policy (or policy.yaml)
//     consent.json         consent cache + circuit breakers
//     batch_state.json     legacy batch state file
//     audit.jsonl          hash-chained authorization audit log
//     events.jsonl         batch event log
//     checkpoints/<batch>/checkpoint-NNNNNN.json
//     pipeline_logs/<run>.json

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const STATE_DIR_NAME: &str = ".waypoint";
pub const DEFAULT_STAGE_RETRY_LIMIT: u32 = 2;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 5;
const DEFAULT_BREAKER_THRESHOLD: u32 = 10;

/// Callers trusted by default: the agents that run each pipeline stage,
/// identified by the stage they run.
pub const CANONICAL_CALLERS: [&str; 8] = [
    "research",
    "plan",
    "test",
    "implement",
    "review",
    "security-audit",
    "document",
    "commit",
];

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaypointConfig {
    /// Workspace root; the path validator confines file access to it.
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub pipeline_log_dir: PathBuf,
    pub batch_state_file: PathBuf,
    pub audit_log: PathBuf,
    pub events_log: PathBuf,
    pub consent_store: PathBuf,
    pub policy_file: PathBuf,

    /// Consecutive denials before a caller loses auto-approval.
    pub circuit_breaker_threshold: u32,
    /// When false, the consent cache is never consulted and every
    /// `NeedsApproval` goes to a human.
    pub auto_approval: bool,
    pub trusted_callers: Vec<String>,
    /// Maximum attempts per stage, including the first.
    pub stage_retry_limit: u32,
    pub stage_timeout: Duration,
    pub hook_timeout: Duration,
    /// Number of checkpoint files kept per batch.
    pub checkpoint_retention: usize,
}

/// Shape of `.waypoint/config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    circuit_breaker_threshold: Option<u32>,
    auto_approval: Option<bool>,
    trusted_callers: Option<Vec<String>>,
    stage_retry_limit: Option<u32>,
    stage_timeout_secs: Option<u64>,
    hook_timeout_ms: Option<u64>,
    checkpoint_retention: Option<usize>,
    checkpoint_dir: Option<PathBuf>,
    pipeline_log_dir: Option<PathBuf>,
    policy_file: Option<PathBuf>,
}

impl WaypointConfig {
    /// Defaults with the standard `.waypoint/` layout under `project_root`.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            checkpoint_dir: state_dir.join("checkpoints"),
            pipeline_log_dir: state_dir.join("pipeline_logs"),
            batch_state_file: state_dir.join("batch_state.json"),
            audit_log: state_dir.join("audit.jsonl"),
            events_log: state_dir.join("events.jsonl"),
            consent_store: state_dir.join("consent.json"),
            policy_file: state_dir.join("policy.json"),
            state_dir,
            project_root: root,
            circuit_breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            auto_approval: true,
            trusted_callers: CANONICAL_CALLERS.iter().map(|s| s.to_string()).collect(),
            stage_retry_limit: DEFAULT_STAGE_RETRY_LIMIT,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            hook_timeout: Duration::from_millis(DEFAULT_HOOK_TIMEOUT_MS),
            checkpoint_retention: DEFAULT_CHECKPOINT_RETENTION,
        }
    }

    /// Defaults, then `.waypoint/config.toml`, then the process environment.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::for_project(project_root);
        config.apply_file()?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        tracing::debug!(
            root = %config.project_root.display(),
            threshold = config.circuit_breaker_threshold,
            retry_limit = config.stage_retry_limit,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join("config.toml")
    }

    /// Overlay `.waypoint/config.toml`. A missing file changes nothing.
    pub fn apply_file(&mut self) -> Result<(), ConfigError> {
        let path = self.config_file();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        let file: ConfigFile =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;

        if let Some(v) = file.circuit_breaker_threshold {
            self.circuit_breaker_threshold = v;
        }
        if let Some(v) = file.auto_approval {
            self.auto_approval = v;
        }
        if let Some(v) = file.trusted_callers {
            self.trusted_callers = v;
        }
        if let Some(v) = file.stage_retry_limit {
            self.stage_retry_limit = v;
        }
        if let Some(v) = file.stage_timeout_secs {
            self.stage_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.hook_timeout_ms {
            self.hook_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.checkpoint_retention {
            self.checkpoint_retention = v;
        }
        if let Some(v) = file.checkpoint_dir {
            self.checkpoint_dir = self.resolve(v);
        }
        if let Some(v) = file.pipeline_log_dir {
            self.pipeline_log_dir = self.resolve(v);
        }
        if let Some(v) = file.policy_file {
            self.policy_file = self.resolve(v);
        }
        Ok(())
    }

    /// Overlay `WAYPOINT_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "WAYPOINT_CIRCUIT_BREAKER_THRESHOLD")? {
            self.circuit_breaker_threshold = v;
        }
        if let Some(raw) = lookup("WAYPOINT_CHECKPOINT_DIR") {
            self.checkpoint_dir = self.resolve(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("WAYPOINT_AUTO_APPROVAL") {
            self.auto_approval = parse_bool("WAYPOINT_AUTO_APPROVAL", &raw)?;
        }
        if let Some(raw) = lookup("WAYPOINT_TRUSTED_CALLERS") {
            self.trusted_callers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = parsed(&lookup, "WAYPOINT_STAGE_RETRY_LIMIT")? {
            self.stage_retry_limit = v;
        }
        if let Some(v) = parsed::<u64, _>(&lookup, "WAYPOINT_STAGE_TIMEOUT_SECS")? {
            self.stage_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parsed::<u64, _>(&lookup, "WAYPOINT_HOOK_TIMEOUT_MS")? {
            self.hook_timeout = Duration::from_millis(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        if self.stage_retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "stage_retry_limit must be at least 1 attempt".into(),
            ));
        }
        if self.checkpoint_retention == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_retention must keep at least 1 file".into(),
            ));
        }
        Ok(())
    }

    pub fn is_trusted(&self, caller: &str) -> bool {
        self.trusted_callers.iter().any(|c| c == caller)
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.project_root.join(path)
        }
    }
}

fn parsed<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}
