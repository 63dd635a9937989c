// consent.rs — Layer 4: consent cache + circuit breaker.
//
// Only acts on a running NeedsApproval:
//
//   breaker tripped / auto-approval off  -> ask a human, ignore the cache
//   cached approval                      -> Safe
//   cached denial                        -> Blocked (no prompt, no new denial)
//   nothing cached                       -> ask a human
//
// A human answer is recorded. Every denial counts toward the caller's breaker.

use wp_audit::{AuditAction, AuditEvent, AuditVerdict};
use wp_consent::ConsentCache;
use wp_policy::PolicyDecision;

use crate::error::AuthzError;
use crate::layer::{AuthorizationLayer, LayerContext, LayerRole};

const LAYER_NAME: &str = "consent";

/// A human's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
    /// No answer now; the request stays `NeedsApproval` and nothing is recorded.
    Deferred,
}

/// What the human is being asked.
#[derive(Debug, Clone)]
pub struct ApprovalRequest<'a> {
    pub caller: &'a str,
    pub signature: &'a str,
    pub reason: &'a str,
    /// The caller's breaker has tripped; the cache was not consulted.
    pub locked: bool,
}

/// Source of human approval decisions.
pub trait ApprovalPrompt: Send {
    fn ask(&mut self, request: &ApprovalRequest<'_>) -> Result<ApprovalResponse, AuthzError>;
}

/// Never answers. Used where no human is attached (the pre-tool-use hook);
/// decisions are recorded later through `waypoint consent approve|deny`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredPrompt;

impl ApprovalPrompt for DeferredPrompt {
    fn ask(&mut self, _request: &ApprovalRequest<'_>) -> Result<ApprovalResponse, AuthzError> {
        Ok(ApprovalResponse::Deferred)
    }
}

pub struct ConsentLayer {
    cache: ConsentCache,
    prompt: Box<dyn ApprovalPrompt>,
    auto_approval: bool,
    pending_audit: Vec<AuditEvent>,
}

impl ConsentLayer {
    pub fn new(cache: ConsentCache, prompt: Box<dyn ApprovalPrompt>, auto_approval: bool) -> Self {
        Self {
            cache,
            prompt,
            auto_approval,
            pending_audit: Vec::new(),
        }
    }

    pub fn cache(&self) -> &ConsentCache {
        &self.cache
    }

    fn ask_and_record(
        &mut self,
        ctx: &LayerContext<'_>,
        reason: &str,
        locked: bool,
    ) -> Result<PolicyDecision, AuthzError> {
        let request = ApprovalRequest {
            caller: ctx.caller,
            signature: ctx.signature,
            reason,
            locked,
        };
        match self.prompt.ask(&request)? {
            ApprovalResponse::Deferred => Ok(PolicyDecision::needs_approval(reason)),
            ApprovalResponse::Approved => {
                self.record(ctx, true)?;
                Ok(PolicyDecision::Safe)
            }
            ApprovalResponse::Denied => {
                self.record(ctx, false)?;
                tracing::warn!(
                    caller = %ctx.caller,
                    signature = %ctx.signature,
                    denials = self.cache.denial_count(ctx.caller),
                    "action denied by user"
                );
                Ok(PolicyDecision::blocked(format!("denied by user ({})", reason)))
            }
        }
    }

    fn record(&mut self, ctx: &LayerContext<'_>, approved: bool) -> Result<(), AuthzError> {
        let outcome = self.cache.record(ctx.caller, ctx.signature, approved)?;
        let verdict = if approved {
            AuditVerdict::Safe
        } else {
            AuditVerdict::Blocked
        };
        self.pending_audit.push(
            AuditEvent::new(ctx.caller, AuditAction::ConsentRecorded)
                .with_signature(ctx.signature)
                .with_layer(LAYER_NAME)
                .with_verdict(verdict)
                .with_metadata(serde_json::json!({
                    "consecutive_denials": outcome.entry.consecutive_denials,
                })),
        );
        if outcome.tripped {
            self.pending_audit.push(
                AuditEvent::new(ctx.caller, AuditAction::BreakerTripped)
                    .with_layer(LAYER_NAME)
                    .with_reason(format!(
                        "{} consecutive denials; auto-approval disabled until reset",
                        outcome.entry.consecutive_denials
                    )),
            );
        }
        Ok(())
    }
}

impl AuthorizationLayer for ConsentLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn role(&self) -> LayerRole {
        LayerRole::Resolver
    }

    fn evaluate(&mut self, ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError> {
        let reason = match ctx.current {
            PolicyDecision::NeedsApproval { reason } => reason.as_str(),
            other => return Ok(other.clone()),
        };

        let locked = self.cache.is_locked(ctx.caller);
        if locked || !self.auto_approval {
            if !ctx.upgrade_allowed {
                return Ok(PolicyDecision::needs_approval(reason));
            }
            let why = if locked {
                format!("{}; auto-approval disabled after repeated denials", reason)
            } else {
                reason.to_string()
            };
            return self.ask_and_record(ctx, &why, locked);
        }

        match self.cache.lookup(ctx.caller, ctx.signature) {
            Some(false) => Ok(PolicyDecision::blocked(format!(
                "previously denied by user ({})",
                reason
            ))),
            Some(true) if ctx.upgrade_allowed => {
                tracing::debug!(caller = %ctx.caller, signature = %ctx.signature, "cached approval");
                Ok(PolicyDecision::Safe)
            }
            Some(true) => Ok(PolicyDecision::needs_approval(reason)),
            None if ctx.upgrade_allowed => self.ask_and_record(ctx, reason, false),
            None => Ok(PolicyDecision::needs_approval(reason)),
        }
    }

    fn drain_audit(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.pending_audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use wp_policy::ToolAction;

    struct Scripted(VecDeque<ApprovalResponse>);

    impl ApprovalPrompt for Scripted {
        fn ask(&mut self, _r: &ApprovalRequest<'_>) -> Result<ApprovalResponse, AuthzError> {
            Ok(self.0.pop_front().unwrap_or(ApprovalResponse::Deferred))
        }
    }

    fn layer(answers: &[ApprovalResponse], threshold: u32) -> ConsentLayer {
        ConsentLayer::new(
            ConsentCache::in_memory(threshold).unwrap(),
            Box::new(Scripted(answers.iter().copied().collect())),
            true,
        )
    }

    fn eval(layer: &mut ConsentLayer, current: PolicyDecision, sig: &str) -> PolicyDecision {
        let action = ToolAction::shell("git push");
        let ctx = LayerContext {
            caller: "implement",
            action: &action,
            signature: sig,
            workspace_root: Path::new("/work"),
            current: &current,
            upgrade_allowed: true,
        };
        layer.evaluate(&ctx).unwrap()
    }

    fn pending() -> PolicyDecision {
        PolicyDecision::needs_approval("command matches approval pattern 'git push*'")
    }

    #[test]
    fn passes_through_anything_but_needs_approval() {
        let mut l = layer(&[], 10);
        assert!(eval(&mut l, PolicyDecision::Safe, "s").is_safe());
        assert!(eval(&mut l, PolicyDecision::blocked("x"), "s").is_blocked());
    }

    #[test]
    fn approval_is_cached_for_identical_action() {
        let mut l = layer(&[ApprovalResponse::Approved], 10);
        assert!(eval(&mut l, pending(), "shell:git push").is_safe());
        // Second time: no prompt answers left, cache answers.
        assert!(eval(&mut l, pending(), "shell:git push").is_safe());
        assert_eq!(l.drain_audit().len(), 1);
    }

    #[test]
    fn cached_denial_blocks_without_counting_again() {
        let mut l = layer(&[ApprovalResponse::Denied], 10);
        assert!(eval(&mut l, pending(), "shell:git push").is_blocked());
        assert!(eval(&mut l, pending(), "shell:git push").is_blocked());
        assert_eq!(l.cache().denial_count("implement"), 1);
    }

    #[test]
    fn deferred_prompt_leaves_request_pending_and_records_nothing() {
        let mut l = layer(&[], 10);
        assert!(eval(&mut l, pending(), "shell:git push").requires_approval());
        assert!(l.cache().entries().is_empty());
        assert!(l.drain_audit().is_empty());
    }

    #[test]
    fn tripped_breaker_ignores_stale_cached_approval() {
        let mut answers = vec![ApprovalResponse::Approved];
        answers.extend(std::iter::repeat(ApprovalResponse::Denied).take(10));
        let mut l = layer(&answers, 10);

        assert!(eval(&mut l, pending(), "shell:git push").is_safe());
        for i in 0..10 {
            assert!(eval(&mut l, pending(), &format!("shell:other {}", i)).is_blocked());
        }
        assert!(l.cache().is_locked("implement"));
        let audit = l.drain_audit();
        assert!(audit.iter().any(|e| e.action == AuditAction::BreakerTripped));

        // The cached approval would say Safe; the breaker forces a prompt,
        // which has no answers left and defers.
        assert!(eval(&mut l, pending(), "shell:git push").requires_approval());
    }

    #[test]
    fn auto_approval_off_always_prompts() {
        let mut l = ConsentLayer::new(
            ConsentCache::in_memory(10).unwrap(),
            Box::new(Scripted(VecDeque::from([ApprovalResponse::Approved]))),
            false,
        );
        assert!(eval(&mut l, pending(), "shell:git push").is_safe());
        assert!(eval(&mut l, pending(), "shell:git push").requires_approval());
    }

    #[test]
    fn no_upgrade_after_an_earlier_layer_failed() {
        let mut l = layer(&[ApprovalResponse::Approved], 10);
        let action = ToolAction::shell("git push");
        let current = pending();
        let ctx = LayerContext {
            caller: "implement",
            action: &action,
            signature: "shell:git push",
            workspace_root: Path::new("/work"),
            current: &current,
            upgrade_allowed: false,
        };
        assert!(l.evaluate(&ctx).unwrap().requires_approval());
        // The prompt was never consulted.
        assert!(l.cache().entries().is_empty());
    }
}
