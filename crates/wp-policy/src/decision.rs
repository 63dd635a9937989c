// decision.rs — The tagged verdict every authorization layer produces.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The result of evaluating an action.
///
/// Serializes as `{"decision": "blocked", "reason": "..."}` so hook output and
/// audit metadata stay readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// The action may proceed without asking anyone.
    Safe,
    /// The action must not proceed.
    Blocked { reason: String },
    /// A human has to approve the action first.
    NeedsApproval { reason: String },
}

impl PolicyDecision {
    pub fn blocked(reason: impl Into<String>) -> Self {
        PolicyDecision::Blocked {
            reason: reason.into(),
        }
    }

    pub fn needs_approval(reason: impl Into<String>) -> Self {
        PolicyDecision::NeedsApproval {
            reason: reason.into(),
        }
    }

    /// Ordering used to combine verdicts: Safe < NeedsApproval < Blocked.
    pub fn severity(&self) -> u8 {
        match self {
            PolicyDecision::Safe => 0,
            PolicyDecision::NeedsApproval { .. } => 1,
            PolicyDecision::Blocked { .. } => 2,
        }
    }

    /// Keep whichever verdict is more restrictive. Ties keep `self`.
    pub fn strictest(self, other: PolicyDecision) -> PolicyDecision {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, PolicyDecision::Safe)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, PolicyDecision::Blocked { .. })
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self, PolicyDecision::NeedsApproval { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Safe => None,
            PolicyDecision::Blocked { reason } | PolicyDecision::NeedsApproval { reason } => {
                Some(reason)
            }
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyDecision::Safe => write!(f, "safe"),
            PolicyDecision::Blocked { reason } => write!(f, "blocked: {}", reason),
            PolicyDecision::NeedsApproval { reason } => write!(f, "needs approval: {}", reason),
        }
    }
}
