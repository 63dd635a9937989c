// layer.rs — The AuthorizationLayer trait and the context each layer sees.

use std::path::Path;

use wp_audit::AuditEvent;
use wp_policy::{PolicyDecision, ToolAction};

use crate::error::AuthzError;

/// How the pipeline folds a layer's verdict into the running decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// The verdict can only tighten the running decision.
    Gate,
    /// The verdict replaces a running `NeedsApproval` (it may upgrade it to
    /// `Safe` or settle it as `Blocked`). Against any other running decision
    /// it behaves like a gate.
    Resolver,
}

/// Everything a layer may look at. Layers never execute the action.
#[derive(Debug, Clone, Copy)]
pub struct LayerContext<'a> {
    /// The stage or agent requesting the action.
    pub caller: &'a str,
    pub action: &'a ToolAction,
    /// Canonical signature of `action`.
    pub signature: &'a str,
    pub workspace_root: &'a Path,
    /// The decision accumulated from earlier layers.
    pub current: &'a PolicyDecision,
    /// False once an earlier layer failed internally: nothing may upgrade
    /// the request to `Safe` from then on.
    pub upgrade_allowed: bool,
}

/// One step in the authorization chain.
pub trait AuthorizationLayer: Send {
    /// Short name recorded in audit records and traces.
    fn name(&self) -> &str;

    fn role(&self) -> LayerRole {
        LayerRole::Gate
    }

    fn evaluate(&mut self, ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError>;

    /// Extra audit records produced by the last `evaluate` call (consent
    /// recorded, breaker tripped). Drained by the pipeline after each call.
    fn drain_audit(&mut self) -> Vec<AuditEvent> {
        Vec::new()
    }
}
