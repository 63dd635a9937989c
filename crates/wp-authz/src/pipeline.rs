// pipeline.rs — AuthorizationPipeline: ordered layers, fail-closed folding.
//
// Layers run strictly in order. A Blocked verdict stops the chain. Otherwise
// the strictest verdict so far is carried forward; a Resolver layer (consent)
// may settle a running NeedsApproval.
//
// A layer that fails internally raises the decision to at least
// NeedsApproval and forbids any later upgrade to Safe. Later layers still
// run, so a Blocked from them still wins.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wp_audit::{AuditAction, AuditEvent, AuditLog, AuditVerdict};
use wp_config::WaypointConfig;
use wp_consent::ConsentCache;
use wp_policy::{PolicyDecision, PolicyStore, ToolAction};

use crate::consent::{ApprovalPrompt, ConsentLayer};
use crate::error::AuthzError;
use crate::layer::{AuthorizationLayer, LayerContext, LayerRole};
use crate::sandbox::SandboxLayer;
use crate::trust::TrustLayer;
use crate::validator::ValidatorLayer;

/// One layer's contribution to a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerVerdict {
    pub layer: String,
    pub decision: PolicyDecision,
    /// Set when the layer failed internally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final decision plus the per-layer trace that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationOutcome {
    pub caller: String,
    pub signature: String,
    pub decision: PolicyDecision,
    pub layers: Vec<LayerVerdict>,
}

impl AuthorizationOutcome {
    /// The first layer whose verdict matches the final decision's severity.
    pub fn deciding_layer(&self) -> Option<&str> {
        let severity = self.decision.severity();
        self.layers
            .iter()
            .find(|v| v.decision.severity() == severity)
            .map(|v| v.layer.as_str())
    }

    /// Plain-words explanation for hook output and CLI display.
    pub fn explanation(&self) -> String {
        match (&self.decision, self.deciding_layer()) {
            (PolicyDecision::Safe, _) => format!("{} allowed", self.signature),
            (decision, Some(layer)) => format!("{} [{} layer]", decision, layer),
            (decision, None) => decision.to_string(),
        }
    }
}

impl fmt::Display for AuthorizationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explanation())
    }
}

/// A layer that could not be built; every evaluation reports the failure.
struct UnavailableLayer {
    name: String,
    reason: String,
}

impl AuthorizationLayer for UnavailableLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> LayerRole {
        LayerRole::Resolver
    }

    fn evaluate(&mut self, _ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError> {
        Err(AuthzError::Unavailable {
            layer: self.name.clone(),
            reason: self.reason.clone(),
        })
    }
}

/// Chain of authorization layers with an audit trail.
pub struct AuthorizationPipeline {
    workspace_root: PathBuf,
    layers: Vec<Box<dyn AuthorizationLayer>>,
    audit: Option<AuditLog>,
}

impl AuthorizationPipeline {
    /// An empty pipeline. With no layers every action is `Safe`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            layers: Vec::new(),
            audit: None,
        }
    }

    pub fn with_layer(mut self, layer: Box<dyn AuthorizationLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_audit_log(mut self, log: AuditLog) -> Self {
        self.audit = Some(log);
        self
    }

    /// The standard four layers, wired from configuration: sandbox,
    /// validator, trust, consent. The audit log is opened at
    /// `config.audit_log`.
    ///
    /// An unreadable consent store does not stop construction; the consent
    /// layer is replaced by one that always fails, which keeps every
    /// request at `NeedsApproval` or stricter.
    pub fn standard(
        config: &WaypointConfig,
        prompt: Box<dyn ApprovalPrompt>,
    ) -> Result<Self, AuthzError> {
        let policy = PolicyStore::open(&config.policy_file);
        let consent_layer: Box<dyn AuthorizationLayer> =
            match ConsentCache::open(&config.consent_store, config.circuit_breaker_threshold) {
                Ok(cache) => Box::new(ConsentLayer::new(cache, prompt, config.auto_approval)),
                Err(e) => {
                    tracing::warn!("{}; consent layer disabled, approvals will not be cached", e);
                    Box::new(UnavailableLayer {
                        name: "consent".to_string(),
                        reason: e.to_string(),
                    })
                }
            };

        Ok(Self::new(&config.project_root)
            .with_layer(Box::new(SandboxLayer::new(policy)))
            .with_layer(Box::new(ValidatorLayer::new()))
            .with_layer(Box::new(TrustLayer::new(config.trusted_callers.iter().cloned())))
            .with_layer(consent_layer)
            .with_audit_log(AuditLog::open(&config.audit_log)?))
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Decide whether `caller` may perform `action`. Never fails: internal
    /// errors are folded into the decision.
    pub fn authorize(&mut self, caller: &str, action: &ToolAction) -> AuthorizationOutcome {
        let signature = action.signature();
        let mut current = PolicyDecision::Safe;
        let mut upgrade_allowed = true;
        let mut audit_ok = true;
        let mut trace = Vec::with_capacity(self.layers.len());

        for layer in self.layers.iter_mut() {
            let ctx = LayerContext {
                caller,
                action,
                signature: &signature,
                workspace_root: &self.workspace_root,
                current: &current,
                upgrade_allowed,
            };
            let result = layer.evaluate(&ctx);
            let name = layer.name().to_string();

            let verdict = match result {
                Ok(decision) => {
                    current = match layer.role() {
                        LayerRole::Resolver if current.requires_approval() => {
                            if decision.is_safe() && !upgrade_allowed {
                                current
                            } else {
                                decision.clone()
                            }
                        }
                        _ => current.strictest(decision.clone()),
                    };
                    tracing::debug!(layer = %name, signature = %signature, verdict = %decision, "layer verdict");
                    LayerVerdict {
                        layer: name,
                        decision,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(layer = %name, signature = %signature, "layer failed: {}", e);
                    upgrade_allowed = false;
                    let floor =
                        PolicyDecision::needs_approval(format!("{} layer failed: {}", name, e));
                    current = current.strictest(floor.clone());
                    LayerVerdict {
                        layer: name,
                        decision: floor,
                        error: Some(e.to_string()),
                    }
                }
            };

            let mut event = AuditEvent::new(caller, AuditAction::LayerDecision)
                .with_signature(signature.as_str())
                .with_layer(verdict.layer.as_str())
                .with_verdict(audit_verdict(&verdict));
            if let Some(reason) = verdict.error.as_deref().or(verdict.decision.reason()) {
                event = event.with_reason(reason);
            }
            audit_ok &= append(&mut self.audit, event);
            for extra in layer.drain_audit() {
                audit_ok &= append(&mut self.audit, extra);
            }
            trace.push(verdict);

            if current.is_blocked() {
                break;
            }
        }

        if !audit_ok && current.is_safe() {
            current = PolicyDecision::needs_approval("audit log unavailable; cannot record decision");
        }

        let mut final_event = AuditEvent::new(caller, AuditAction::FinalDecision)
            .with_signature(signature.as_str())
            .with_verdict(decision_verdict(&current));
        if let Some(reason) = current.reason() {
            final_event = final_event.with_reason(reason);
        }
        append(&mut self.audit, final_event);

        match &current {
            PolicyDecision::Safe => {
                tracing::debug!(caller = %caller, signature = %signature, "authorized")
            }
            other => tracing::info!(caller = %caller, signature = %signature, "{}", other),
        }

        AuthorizationOutcome {
            caller: caller.to_string(),
            signature,
            decision: current,
            layers: trace,
        }
    }
}

fn append(audit: &mut Option<AuditLog>, mut event: AuditEvent) -> bool {
    let Some(log) = audit else {
        return true;
    };
    match log.append(&mut event) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("failed to append audit record: {}", e);
            false
        }
    }
}

fn decision_verdict(decision: &PolicyDecision) -> AuditVerdict {
    match decision {
        PolicyDecision::Safe => AuditVerdict::Safe,
        PolicyDecision::Blocked { .. } => AuditVerdict::Blocked,
        PolicyDecision::NeedsApproval { .. } => AuditVerdict::NeedsApproval,
    }
}

fn audit_verdict(verdict: &LayerVerdict) -> AuditVerdict {
    if verdict.error.is_some() {
        AuditVerdict::Error
    } else {
        decision_verdict(&verdict.decision)
    }
}
