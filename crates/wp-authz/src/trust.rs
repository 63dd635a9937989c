// trust.rs — Layer 3: caller allowlist.

use wp_policy::PolicyDecision;

use crate::error::AuthzError;
use crate::layer::{AuthorizationLayer, LayerContext};

/// Forces `NeedsApproval` for callers that are not on the allowlist.
#[derive(Debug, Clone)]
pub struct TrustLayer {
    trusted: Vec<String>,
}

impl TrustLayer {
    pub fn new<I, S>(trusted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted: trusted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_trusted(&self, caller: &str) -> bool {
        self.trusted.iter().any(|t| t == caller)
    }
}

impl AuthorizationLayer for TrustLayer {
    fn name(&self) -> &str {
        "trust"
    }

    fn evaluate(&mut self, ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError> {
        if self.is_trusted(ctx.caller) {
            Ok(PolicyDecision::Safe)
        } else {
            tracing::info!(caller = %ctx.caller, "untrusted caller; approval required");
            Ok(PolicyDecision::needs_approval(format!(
                "caller '{}' is not on the trusted allowlist",
                ctx.caller
            )))
        }
    }
}
