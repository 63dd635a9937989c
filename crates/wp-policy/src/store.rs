// store.rs — PolicyStore: load-once policy cache and rule matching.
//
// The store is constructed once at startup with the policy path and loads the
// file lazily on first use. The result, success or failure, is cached for the
// lifetime of the store; a failure is never retried into a permissive state.
//
// Rule matching is literal:
//   - commands: glob patterns over the whitespace-normalized command line
//   - paths: component-wise prefixes, or globs when the entry has * ? [
//     (a leading `~/` is expanded to the home directory on both sides)
//   - hosts: exact host match

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::action::{normalize_command, url_host, ToolAction};
use crate::error::PolicyError;
use crate::policy::{SecurityPolicy, POLICY_SCHEMA_VERSION};

/// Risk class of an action, from least to most restrictive handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Benign,
    Destructive,
    Network,
    /// No rule matched, or the policy could not be loaded.
    Unknown,
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskClass::Benign => write!(f, "benign"),
            RiskClass::Destructive => write!(f, "destructive"),
            RiskClass::Network => write!(f, "network"),
            RiskClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which command rule list matched, with the matching pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRule {
    Blocked(String),
    Approval(String),
    Safe(String),
    NoMatch,
}

/// Which path rule list matched, with the matching entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRule {
    Blocked(String),
    Allowed(String),
    NoMatch,
}

/// A policy with every pattern compiled up front.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    policy: SecurityPolicy,
    safe: Vec<(Pattern, String)>,
    approval: Vec<(Pattern, String)>,
    blocked: Vec<(Pattern, String)>,
    destructive: Vec<Pattern>,
    network: Vec<Pattern>,
    benign: Vec<Pattern>,
    allowed_paths: Vec<PathMatcher>,
    blocked_paths: Vec<PathMatcher>,
}

impl CompiledPolicy {
    pub fn compile(policy: SecurityPolicy) -> Result<Self, PolicyError> {
        let labelled = |list: &[String]| -> Result<Vec<(Pattern, String)>, PolicyError> {
            list.iter()
                .map(|raw| compile_glob(raw).map(|p| (p, raw.clone())))
                .collect()
        };
        let plain = |list: &[String]| -> Result<Vec<Pattern>, PolicyError> {
            list.iter().map(|raw| compile_glob(raw)).collect()
        };
        let paths = |list: &[String]| -> Result<Vec<PathMatcher>, PolicyError> {
            list.iter().map(|raw| PathMatcher::new(raw)).collect()
        };
        if policy.paths.blocked.is_empty() {
            tracing::warn!("security policy blocks no paths; system and secret files are readable");
        }

        Ok(Self {
            safe: labelled(&policy.commands.safe)?,
            approval: labelled(&policy.commands.approval)?,
            blocked: labelled(&policy.commands.blocked)?,
            destructive: plain(&policy.risk.destructive)?,
            network: plain(&policy.risk.network)?,
            benign: plain(&policy.risk.benign)?,
            allowed_paths: paths(&policy.paths.allowed)?,
            blocked_paths: paths(&policy.paths.blocked)?,
            policy,
        })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }
}

/// The cached outcome of loading the policy.
#[derive(Debug, Clone)]
pub enum PolicyState {
    Loaded(Box<CompiledPolicy>),
    /// Loading failed; every action is treated as `Unknown` risk.
    FailedClosed(PolicyError),
}

/// Load-once cache around the security policy.
#[derive(Debug)]
pub struct PolicyStore {
    source: Option<PathBuf>,
    state: OnceLock<PolicyState>,
}

impl PolicyStore {
    /// Read and validate a policy file (JSON, or YAML by extension).
    pub fn load(path: impl AsRef<Path>) -> Result<SecurityPolicy, PolicyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PolicyError::NotFound {
                path: path.to_path_buf(),
            },
            _ => PolicyError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;

        let malformed = |reason: String| PolicyError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        let policy: SecurityPolicy = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| malformed(e.to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?
        };

        if policy.version > POLICY_SCHEMA_VERSION {
            return Err(malformed(format!(
                "schema version {} is newer than supported version {}",
                policy.version, POLICY_SCHEMA_VERSION
            )));
        }
        Ok(policy)
    }

    /// A store that loads `path` on first use and caches the result.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(path.into()),
            state: OnceLock::new(),
        }
    }

    /// A store over an in-memory policy (already loaded).
    pub fn from_policy(policy: SecurityPolicy) -> Result<Self, PolicyError> {
        let compiled = CompiledPolicy::compile(policy)?;
        Ok(Self {
            source: None,
            state: OnceLock::from(PolicyState::Loaded(Box::new(compiled))),
        })
    }

    /// A store that is permanently failed closed.
    pub fn failed_closed(error: PolicyError) -> Self {
        Self {
            source: None,
            state: OnceLock::from(PolicyState::FailedClosed(error)),
        }
    }

    /// The cached policy state, loading it on first call.
    pub fn state(&self) -> &PolicyState {
        self.state.get_or_init(|| {
            let Some(path) = &self.source else {
                return PolicyState::FailedClosed(PolicyError::NotFound {
                    path: PathBuf::new(),
                });
            };
            match Self::load(path).and_then(CompiledPolicy::compile) {
                Ok(compiled) => {
                    tracing::info!("security policy loaded from {}", path.display());
                    PolicyState::Loaded(Box::new(compiled))
                }
                Err(e) => {
                    tracing::warn!("{}; failing closed, every action needs approval", e);
                    PolicyState::FailedClosed(e)
                }
            }
        })
    }

    /// The load failure, if the store is failed closed.
    pub fn failure(&self) -> Option<&PolicyError> {
        match self.state() {
            PolicyState::FailedClosed(e) => Some(e),
            PolicyState::Loaded(_) => None,
        }
    }

    fn compiled(&self) -> Option<&CompiledPolicy> {
        match self.state() {
            PolicyState::Loaded(compiled) => Some(&**compiled),
            PolicyState::FailedClosed(_) => None,
        }
    }

    /// Classify an action's risk. Paths are resolved against `root`.
    pub fn classify(&self, action: &ToolAction, root: &Path) -> RiskClass {
        let Some(compiled) = self.compiled() else {
            return RiskClass::Unknown;
        };
        match action {
            ToolAction::Shell { command } => {
                let command = normalize_command(command);
                if any_match(&compiled.destructive, &command) {
                    RiskClass::Destructive
                } else if any_match(&compiled.network, &command) {
                    RiskClass::Network
                } else if any_match(&compiled.benign, &command) {
                    RiskClass::Benign
                } else {
                    RiskClass::Unknown
                }
            }
            ToolAction::FileWrite { path } => match self.match_path(path, root) {
                PathRule::Blocked(_) => RiskClass::Destructive,
                PathRule::Allowed(_) => RiskClass::Benign,
                PathRule::NoMatch => RiskClass::Unknown,
            },
            ToolAction::FileRead { path } => match self.match_path(path, root) {
                PathRule::Blocked(_) => RiskClass::Unknown,
                _ => RiskClass::Benign,
            },
            ToolAction::Network { .. } => RiskClass::Network,
            ToolAction::Other { .. } => RiskClass::Unknown,
        }
    }

    /// Match a command line against the blocked, approval, and safe lists, in that order.
    pub fn match_command(&self, command: &str) -> CommandRule {
        let Some(compiled) = self.compiled() else {
            return CommandRule::NoMatch;
        };
        let command = normalize_command(command);
        if let Some(raw) = first_match(&compiled.blocked, &command) {
            CommandRule::Blocked(raw)
        } else if let Some(raw) = first_match(&compiled.approval, &command) {
            CommandRule::Approval(raw)
        } else if let Some(raw) = first_match(&compiled.safe, &command) {
            CommandRule::Safe(raw)
        } else {
            CommandRule::NoMatch
        }
    }

    /// Match a path against the blocked and allowed prefixes, blocked first.
    ///
    /// Paths under `root` are matched relative to it, so a workspace that
    /// happens to live under a blocked prefix (e.g. `/root/project`) is not
    /// blocked wholesale.
    pub fn match_path(&self, path: &Path, root: &Path) -> PathRule {
        let Some(compiled) = self.compiled() else {
            return PathRule::NoMatch;
        };
        let candidate = relative_to(&expand_home(path), root);
        for matcher in &compiled.blocked_paths {
            if matcher.matches(&candidate) {
                return PathRule::Blocked(matcher.raw().to_string());
            }
        }
        for matcher in &compiled.allowed_paths {
            if matcher.matches(&candidate) {
                return PathRule::Allowed(matcher.raw().to_string());
            }
        }
        PathRule::NoMatch
    }

    /// Whether the URL's host is on the network allowlist.
    pub fn host_allowed(&self, url: &str) -> bool {
        let (Some(compiled), Some(host)) = (self.compiled(), url_host(url)) else {
            return false;
        };
        compiled
            .policy
            .network
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&host))
    }
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Prefix(PathBuf, String),
    Glob(Pattern, String),
}

impl PathMatcher {
    fn new(raw: &str) -> Result<Self, PolicyError> {
        let expanded = expand_home(Path::new(raw));
        if raw.contains(['*', '?', '[']) {
            let pattern = compile_glob(&expanded.to_string_lossy())?;
            Ok(PathMatcher::Glob(pattern, raw.to_string()))
        } else {
            Ok(PathMatcher::Prefix(lexical_clean(&expanded), raw.to_string()))
        }
    }

    fn matches(&self, path: &Path) -> bool {
        match self {
            PathMatcher::Prefix(prefix, _) => path.starts_with(prefix),
            PathMatcher::Glob(pattern, _) => pattern.matches_path(path),
        }
    }

    fn raw(&self) -> &str {
        match self {
            PathMatcher::Prefix(_, raw) | PathMatcher::Glob(_, raw) => raw,
        }
    }
}

fn compile_glob(raw: &str) -> Result<Pattern, PolicyError> {
    Pattern::new(raw).map_err(|e| PolicyError::InvalidPattern {
        pattern: raw.to_string(),
        reason: e.to_string(),
    })
}

fn any_match(patterns: &[Pattern], text: &str) -> bool {
    patterns.iter().any(|p| p.matches(text))
}

fn first_match(patterns: &[(Pattern, String)], text: &str) -> Option<String> {
    patterns
        .iter()
        .find(|(p, _)| p.matches(text))
        .map(|(_, raw)| raw.clone())
}

/// Replace a leading `~` component with the home directory, when there is one.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Drop `.` components; keep everything else, including `..`.
fn lexical_clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Express `path` relative to `root` when it lies under it.
fn relative_to(path: &Path, root: &Path) -> PathBuf {
    let cleaned = lexical_clean(path);
    match cleaned.strip_prefix(lexical_clean(root)) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn default_store() -> PolicyStore {
        PolicyStore::from_policy(SecurityPolicy::default()).unwrap()
    }

    #[test]
    fn classify_shell_commands_by_rule_table() {
        let store = default_store();
        let root = Path::new("/work");
        assert_eq!(
            store.classify(&ToolAction::shell("rm -rf build"), root),
            RiskClass::Destructive
        );
        assert_eq!(
            store.classify(&ToolAction::shell("curl https://example.com"), root),
            RiskClass::Network
        );
        assert_eq!(
            store.classify(&ToolAction::shell("cargo  test --all"), root),
            RiskClass::Benign
        );
        assert_eq!(
            store.classify(&ToolAction::shell("make deploy"), root),
            RiskClass::Unknown
        );
    }

    #[test]
    fn classify_writes_by_path_prefix() {
        let store = default_store();
        let root = Path::new("/work");
        assert_eq!(
            store.classify(&ToolAction::write("/work/src/main.rs"), root),
            RiskClass::Benign
        );
        assert_eq!(
            store.classify(&ToolAction::write("/etc/hosts"), root),
            RiskClass::Destructive
        );
        assert_eq!(
            store.classify(&ToolAction::write("README.md"), root),
            RiskClass::Unknown
        );
    }

    #[test]
    fn command_rules_check_blocked_before_approval_and_safe() {
        let store = default_store();
        assert_eq!(
            store.match_command("git push --force origin main"),
            CommandRule::Blocked("git push --force*".to_string())
        );
        assert_eq!(
            store.match_command("git push origin main"),
            CommandRule::Approval("git push*".to_string())
        );
        assert_eq!(
            store.match_command("git status"),
            CommandRule::Safe("git status*".to_string())
        );
        assert_eq!(store.match_command("make"), CommandRule::NoMatch);
    }

    #[test]
    fn path_prefix_matches_on_component_boundary() {
        let policy = SecurityPolicy {
            paths: crate::policy::PathRules {
                allowed: vec!["src".to_string()],
                blocked: vec![],
            },
            ..SecurityPolicy::default()
        };
        let store = PolicyStore::from_policy(policy).unwrap();
        let root = Path::new("/work");
        assert_eq!(
            store.match_path(Path::new("./src/lib.rs"), root),
            PathRule::Allowed("src".to_string())
        );
        assert_eq!(
            store.match_path(Path::new("srcfoo/lib.rs"), root),
            PathRule::NoMatch
        );
    }

    #[test]
    fn glob_path_entries_match_anywhere() {
        let store = default_store();
        let root = Path::new("/work");
        assert!(matches!(
            store.match_path(Path::new("/work/config/.env"), root),
            PathRule::Blocked(_)
        ));
    }

    #[test]
    fn workspace_under_blocked_prefix_is_matched_relative_to_root() {
        let store = default_store();
        let root = Path::new("/root/project");
        assert_eq!(
            store.match_path(Path::new("/root/project/src/main.rs"), root),
            PathRule::Allowed("src/".to_string())
        );
        assert_eq!(
            store.match_path(Path::new("/root/.bashrc"), root),
            PathRule::Blocked("/root".to_string())
        );
    }

    #[test]
    fn home_secrets_are_blocked_by_absolute_path() {
        let store = default_store();
        let root = Path::new("/work");
        for path in [
            "/home/dev/.aws/credentials",
            "/home/dev/.ssh/id_ed25519",
            "/home/dev/.gnupg/pubring.kbx",
            "/Users/dev/.ssh/config",
        ] {
            assert!(
                matches!(store.match_path(Path::new(path), root), PathRule::Blocked(_)),
                "{} should be blocked",
                path
            );
        }
        if let Some(home) = dirs::home_dir() {
            let credentials = home.join(".aws").join("credentials");
            assert!(matches!(
                store.match_path(&credentials, root),
                PathRule::Blocked(_)
            ));
        }
    }

    #[test]
    fn tilde_entries_expand_to_the_home_directory() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let policy = SecurityPolicy {
            paths: crate::policy::PathRules {
                allowed: vec![],
                blocked: vec!["~/vault".to_string()],
            },
            ..SecurityPolicy::default()
        };
        let store = PolicyStore::from_policy(policy).unwrap();
        let root = Path::new("/work");
        assert_eq!(
            store.match_path(&home.join("vault").join("key"), root),
            PathRule::Blocked("~/vault".to_string())
        );
        assert_eq!(
            store.match_path(Path::new("~/vault/key"), root),
            PathRule::Blocked("~/vault".to_string())
        );
        assert_eq!(
            store.match_path(&home.join("vaulted"), root),
            PathRule::NoMatch
        );
    }

    #[test]
    fn partial_path_override_keeps_protected_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"paths": {"allowed": ["app/"]}}"#).unwrap();
        let store = PolicyStore::open(&path);
        let root = Path::new("/work");
        assert_eq!(
            store.match_path(Path::new("/etc/shadow"), root),
            PathRule::Blocked("/etc".to_string())
        );
        assert_eq!(
            store.match_path(Path::new("/root/.bashrc"), root),
            PathRule::Blocked("/root".to_string())
        );
        assert_eq!(
            store.match_path(Path::new("/work/app/main.rs"), root),
            PathRule::Allowed("app/".to_string())
        );
    }

    #[test]
    fn host_allowlist_is_exact_and_case_insensitive() {
        let policy = SecurityPolicy {
            network: crate::policy::NetworkRules {
                allowed_hosts: vec!["docs.rs".to_string()],
            },
            ..SecurityPolicy::default()
        };
        let store = PolicyStore::from_policy(policy).unwrap();
        assert!(store.host_allowed("https://DOCS.rs/serde"));
        assert!(!store.host_allowed("https://docs.rs.evil.com/"));
    }

    #[test]
    fn missing_policy_file_fails_closed() {
        let dir = tempdir().unwrap();
        let store = PolicyStore::open(dir.path().join("policy.json"));
        assert!(matches!(store.failure(), Some(PolicyError::NotFound { .. })));
        assert_eq!(
            store.classify(&ToolAction::shell("ls"), dir.path()),
            RiskClass::Unknown
        );
        assert_eq!(store.match_command("ls"), CommandRule::NoMatch);
    }

    #[test]
    fn malformed_policy_file_fails_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, "{\"commands\": {\"safe\": [").unwrap();
        let store = PolicyStore::open(&path);
        assert!(matches!(
            store.failure(),
            Some(PolicyError::Malformed { .. })
        ));
        assert_eq!(
            store.classify(&ToolAction::write("src/lib.rs"), dir.path()),
            RiskClass::Unknown
        );
    }

    #[test]
    fn invalid_glob_in_policy_fails_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"commands": {"safe": ["ls [a-"]}}"#).unwrap();
        let store = PolicyStore::open(&path);
        assert!(matches!(
            store.failure(),
            Some(PolicyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn yaml_policy_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        fs::write(
            &path,
            "network:\n  allowed_hosts:\n    - crates.io\n",
        )
        .unwrap();
        let store = PolicyStore::open(&path);
        assert!(store.failure().is_none());
        assert!(store.host_allowed("https://crates.io/crates/serde"));
    }

    #[test]
    fn policy_is_loaded_once_and_cached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, "{}").unwrap();
        let store = PolicyStore::open(&path);
        assert!(store.failure().is_none());

        // Breaking the file afterwards does not affect the cached policy.
        fs::write(&path, "not json").unwrap();
        assert!(store.failure().is_none());
        assert_eq!(store.match_command("git status"), CommandRule::Safe("git status*".into()));
    }

    #[test]
    fn newer_schema_version_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();
        assert!(matches!(
            PolicyStore::load(&path),
            Err(PolicyError::Malformed { .. })
        ));
    }
}
