// sandbox.rs — Layer 1: deterministic rule table from the PolicyStore.

use std::path::Path;

use wp_policy::{CommandRule, PathRule, PolicyDecision, PolicyStore, RiskClass, ToolAction};

use crate::error::AuthzError;
use crate::layer::{AuthorizationLayer, LayerContext};

/// Maps an action onto Safe / Blocked / NeedsApproval using only the policy's
/// pattern lists and risk table.
pub struct SandboxLayer {
    policy: PolicyStore,
}

impl SandboxLayer {
    pub fn new(policy: PolicyStore) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    /// The first command argument that names a blocked path, with the entry it hit.
    fn protected_argument(&self, command: &str, root: &Path) -> Option<(String, String)> {
        path_arguments(command).find_map(|arg| match self.policy.match_path(Path::new(arg), root) {
            PathRule::Blocked(entry) => Some((arg.to_string(), entry)),
            _ => None,
        })
    }

    fn classify_shell(&self, command: &str, risk: RiskClass) -> PolicyDecision {
        match self.policy.match_command(command) {
            CommandRule::Blocked(pattern) => {
                PolicyDecision::blocked(format!("command matches blocked pattern '{}'", pattern))
            }
            CommandRule::Approval(pattern) => PolicyDecision::needs_approval(format!(
                "command matches approval pattern '{}'",
                pattern
            )),
            CommandRule::Safe(_) => PolicyDecision::Safe,
            CommandRule::NoMatch => match risk {
                RiskClass::Benign => PolicyDecision::Safe,
                other => PolicyDecision::needs_approval(format!(
                    "command has {} risk and no rule allows it",
                    other
                )),
            },
        }
    }
}

impl AuthorizationLayer for SandboxLayer {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn evaluate(&mut self, ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError> {
        if let Some(err) = self.policy.failure() {
            return Ok(PolicyDecision::needs_approval(format!(
                "security policy unavailable ({}); every action needs approval",
                err
            )));
        }

        let root = ctx.workspace_root;
        let risk = self.policy.classify(ctx.action, root);
        let decision = match ctx.action {
            ToolAction::Shell { command } => match self.protected_argument(command, root) {
                Some((arg, entry)) => PolicyDecision::blocked(format!(
                    "command argument '{}' is under protected path '{}'",
                    arg, entry
                )),
                None => self.classify_shell(command, risk),
            },
            ToolAction::FileWrite { path } => match self.policy.match_path(path, root) {
                PathRule::Blocked(entry) => {
                    PolicyDecision::blocked(format!("write to protected path '{}'", entry))
                }
                PathRule::Allowed(_) => PolicyDecision::Safe,
                PathRule::NoMatch => PolicyDecision::needs_approval(format!(
                    "write to {} is outside the allowed paths",
                    path.display()
                )),
            },
            ToolAction::FileRead { path } => match self.policy.match_path(path, root) {
                PathRule::Blocked(entry) => {
                    PolicyDecision::blocked(format!("read of protected path '{}'", entry))
                }
                _ => PolicyDecision::Safe,
            },
            ToolAction::Network { url } => {
                if self.policy.host_allowed(url) {
                    PolicyDecision::Safe
                } else {
                    PolicyDecision::needs_approval(format!("network access to {}", url))
                }
            }
            ToolAction::Other { tool, .. } => {
                PolicyDecision::needs_approval(format!("no sandbox rules for tool '{}'", tool))
            }
        };
        tracing::debug!(signature = %ctx.signature, risk = %risk, decision = %decision, "sandbox");
        Ok(decision)
    }
}

/// Words of a command line that look like file paths: anything containing a
/// separator or starting with `.` or `~`. `--flag=value` contributes its value.
fn path_arguments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split_whitespace()
        .map(|word| {
            let word = word.trim_matches(|c: char| c == '\'' || c == '"');
            match word.split_once('=') {
                Some((_, value)) => value,
                None => word,
            }
        })
        .filter(|word| !word.starts_with('-') && !word.contains("://"))
        .filter(|word| word.contains('/') || word.starts_with('.') || word.starts_with('~'))
}
