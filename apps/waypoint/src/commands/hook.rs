// hook.rs — `waypoint hook pre-tool-use`: the host's authorization hook.
//
// Reads one JSON tool call from stdin:
//   { "tool_name": "Bash", "tool_input": { "command": "git push" }, "caller": "commit" }
// and writes one JSON verdict to stdout. Exit 0 lets the call proceed,
// exit 2 denies it. A hook that cannot decide within `hook_timeout` denies.
//
// The hook never blocks on a human: a request that needs approval is denied
// with a note on how to approve it (`waypoint consent approve`), or, for a
// caller whose breaker has tripped, how to re-enable it (`waypoint consent reset`).

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Subcommand;
use serde::{Deserialize, Serialize};
use wp_authz::{
    AuthorizationOutcome, AuthorizationPipeline, AuthzError, DeferredPrompt, LayerVerdict,
};
use wp_config::WaypointConfig;
use wp_consent::ConsentCache;
use wp_policy::{PolicyDecision, ToolAction};

pub const EXIT_CONTINUE: i32 = 0;
pub const EXIT_DENY: i32 = 2;

/// Caller used when neither the request nor the environment names one.
const UNKNOWN_CALLER: &str = "unknown";

#[derive(Subcommand)]
pub enum HookCommands {
    /// Authorize a tool call before the host runs it.
    PreToolUse {
        /// Caller identity (overrides the request's `caller` and WAYPOINT_CALLER).
        #[arg(long)]
        caller: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct HookRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub caller: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HookVerdict {
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(flatten)]
    pub decision: PolicyDecision,
    pub caller: String,
    pub signature: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A finished authorization, plus whether the caller's breaker is tripped.
pub struct Decided {
    pub outcome: AuthorizationOutcome,
    pub caller_locked: bool,
}

impl HookVerdict {
    fn from_decided(decided: Decided) -> Self {
        let Decided {
            outcome,
            caller_locked,
        } = decided;
        // A locked caller is always asked again, so a recorded approval cannot
        // unblock it until the breaker is reset.
        let hint = outcome.decision.requires_approval().then(|| {
            if caller_locked {
                format!(
                    "auto-approval is disabled for '{}' after repeated denials; \
                     re-enable with: waypoint consent reset {}",
                    outcome.caller, outcome.caller
                )
            } else {
                format!(
                    "approve with: waypoint consent approve {} '{}'",
                    outcome.caller, outcome.signature
                )
            }
        });
        Self {
            proceed: outcome.decision.is_safe(),
            explanation: outcome.explanation(),
            decision: outcome.decision,
            caller: outcome.caller,
            signature: outcome.signature,
            layers: outcome.layers,
            hint,
        }
    }

    fn denied(caller: &str, signature: &str, reason: String) -> Self {
        Self {
            proceed: false,
            explanation: format!("blocked: {}", reason),
            decision: PolicyDecision::blocked(reason),
            caller: caller.to_string(),
            signature: signature.to_string(),
            layers: Vec::new(),
            hint: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.proceed {
            EXIT_CONTINUE
        } else {
            EXIT_DENY
        }
    }
}

pub fn execute(cmd: &HookCommands, config: &WaypointConfig) -> anyhow::Result<i32> {
    match cmd {
        HookCommands::PreToolUse { caller } => {
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            let env_caller = std::env::var("WAYPOINT_CALLER").ok();
            let verdict = pre_tool_use(config, &input, caller.clone().or(env_caller));

            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", serde_json::to_string(&verdict)?)?;
            stdout.flush()?;
            Ok(verdict.exit_code())
        }
    }
}

/// Decide one raw hook request. Never fails: every error is a denial.
pub fn pre_tool_use(
    config: &WaypointConfig,
    input: &str,
    caller_override: Option<String>,
) -> HookVerdict {
    let request: HookRequest = match serde_json::from_str(input) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("malformed hook request: {}", e);
            return HookVerdict::denied(
                caller_override.as_deref().unwrap_or(UNKNOWN_CALLER),
                "",
                format!("malformed hook request: {}", e),
            );
        }
    };

    let caller = caller_override
        .or(request.caller)
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string());
    let action = ToolAction::from_tool_call(&request.tool_name, &request.tool_input);
    let signature = action.signature();

    let worker_config = config.clone();
    let worker_caller = caller.clone();
    decide_within(
        config.hook_timeout,
        &caller,
        &signature,
        move || -> Result<Decided, AuthzError> {
            let mut pipeline =
                AuthorizationPipeline::standard(&worker_config, Box::new(DeferredPrompt))?;
            let outcome = pipeline.authorize(&worker_caller, &action);
            drop(pipeline);
            Ok(Decided {
                caller_locked: caller_is_locked(&worker_config, &worker_caller),
                outcome,
            })
        },
    )
}

/// Run `decide` on a worker thread; deny if it errors or misses `budget`.
pub fn decide_within<F, E>(budget: Duration, caller: &str, signature: &str, decide: F) -> HookVerdict
where
    F: FnOnce() -> Result<Decided, E> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone after a timeout; nothing left to report to.
        let _ = tx.send(decide());
    });

    match rx.recv_timeout(budget) {
        Ok(Ok(decided)) => {
            let verdict = HookVerdict::from_decided(decided);
            if !verdict.proceed {
                tracing::warn!(caller = %caller, signature = %signature, "tool call denied: {}", verdict.explanation);
            }
            verdict
        }
        Ok(Err(e)) => {
            tracing::warn!("authorization pipeline unavailable: {}", e);
            HookVerdict::denied(caller, signature, format!("authorization unavailable: {}", e))
        }
        Err(_) => {
            tracing::warn!(caller = %caller, signature = %signature, "hook timed out");
            HookVerdict::denied(
                caller,
                signature,
                format!(
                    "authorization did not finish within {}ms",
                    budget.as_millis()
                ),
            )
        }
    }
}

/// Whether the caller's breaker is tripped, read back from the consent store.
fn caller_is_locked(config: &WaypointConfig, caller: &str) -> bool {
    match ConsentCache::open(&config.consent_store, config.circuit_breaker_threshold) {
        Ok(cache) => cache.is_locked(caller),
        Err(e) => {
            tracing::debug!("consent store unreadable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn workspace(root: &std::path::Path) -> WaypointConfig {
        let config = WaypointConfig::for_project(root);
        fs::create_dir_all(&config.state_dir).unwrap();
        fs::write(&config.policy_file, "{}").unwrap();
        config
    }

    #[test]
    fn safe_call_continues() {
        let dir = tempdir().unwrap();
        let config = workspace(dir.path());
        let verdict = pre_tool_use(
            &config,
            r#"{"tool_name":"Bash","tool_input":{"command":"git status"},"caller":"review"}"#,
            None,
        );
        assert!(verdict.proceed, "{:?}", verdict);
        assert_eq!(verdict.exit_code(), EXIT_CONTINUE);
        assert_eq!(verdict.signature, "shell:git status");
    }

    #[test]
    fn traversal_is_denied_with_exit_two() {
        let dir = tempdir().unwrap();
        let config = workspace(dir.path());
        let verdict = pre_tool_use(
            &config,
            r#"{"tool_name":"Read","tool_input":{"file_path":"../../etc/passwd"},"caller":"research"}"#,
            None,
        );
        assert!(!verdict.proceed);
        assert!(verdict.decision.is_blocked());
        assert_eq!(verdict.exit_code(), EXIT_DENY);
    }

    #[test]
    fn approval_needed_is_denied_with_a_hint() {
        let dir = tempdir().unwrap();
        let config = workspace(dir.path());
        let verdict = pre_tool_use(
            &config,
            r#"{"tool_name":"Bash","tool_input":{"command":"git push origin main"}}"#,
            Some("commit".into()),
        );
        assert!(!verdict.proceed);
        assert!(verdict.decision.requires_approval());
        assert!(verdict.hint.unwrap().contains("waypoint consent approve commit"));
    }

    #[test]
    fn malformed_request_is_denied() {
        let dir = tempdir().unwrap();
        let config = workspace(dir.path());
        let verdict = pre_tool_use(&config, "not json", None);
        assert_eq!(verdict.exit_code(), EXIT_DENY);
        assert_eq!(verdict.caller, UNKNOWN_CALLER);
    }

    #[test]
    fn slow_decision_times_out_to_deny() {
        let verdict = decide_within(Duration::from_millis(20), "plan", "shell:ls", || {
            std::thread::sleep(Duration::from_millis(500));
            Err::<Decided, String>("finished too late".into())
        });
        assert!(!verdict.proceed);
        assert_eq!(verdict.exit_code(), EXIT_DENY);
        assert!(
            verdict.explanation.contains("did not finish within 20ms"),
            "{}",
            verdict.explanation
        );
        assert_eq!(verdict.caller, "plan");
        assert_eq!(verdict.signature, "shell:ls");
    }

    #[test]
    fn pipeline_error_is_denied() {
        let verdict = decide_within(Duration::from_secs(5), "plan", "shell:ls", || {
            Err::<Decided, String>("consent store unreadable".into())
        });
        assert_eq!(verdict.exit_code(), EXIT_DENY);
        assert!(verdict.explanation.contains("authorization unavailable"));
    }

    #[test]
    fn locked_caller_is_told_to_reset_not_approve() {
        let dir = tempdir().unwrap();
        let config = workspace(dir.path());
        let mut cache =
            ConsentCache::open(&config.consent_store, config.circuit_breaker_threshold).unwrap();
        for i in 0..config.circuit_breaker_threshold {
            cache
                .record("commit", &format!("shell:git push origin topic-{}", i), false)
                .unwrap();
        }
        // Approving the exact action is not enough while the breaker is tripped.
        cache
            .record("commit", "shell:git push origin main", true)
            .unwrap();
        drop(cache);

        let request = r#"{"tool_name":"Bash","tool_input":{"command":"git push origin main"}}"#;
        let verdict = pre_tool_use(&config, request, Some("commit".into()));
        assert!(!verdict.proceed);
        assert!(verdict.decision.requires_approval());
        let hint = verdict.hint.unwrap();
        assert!(hint.contains("waypoint consent reset commit"), "{}", hint);
        assert!(!hint.contains("consent approve"));

        // Following the hint lets the recorded approval apply again.
        let mut cache =
            ConsentCache::open(&config.consent_store, config.circuit_breaker_threshold).unwrap();
        assert!(cache.reset("commit").unwrap());
        drop(cache);
        let verdict = pre_tool_use(&config, request, Some("commit".into()));
        assert!(verdict.proceed, "{:?}", verdict);
    }

    #[test]
    fn verdict_serializes_with_continue_flag() {
        let v = HookVerdict::denied("plan", "shell:x", "nope".into());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["continue"], false);
        assert_eq!(json["decision"], "blocked");
        assert_eq!(json["reason"], "nope");
    }
}
