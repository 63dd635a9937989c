// event.rs — Audit record data model.
//
// One AuditEvent is written per authorization layer verdict, per final
// decision, and per consent/breaker transition. Records are chained through
// `previous_hash` so the log can be checked for tampering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of decision point this record captures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A single authorization layer produced a verdict.
    LayerDecision,
    /// The pipeline produced its final decision for a request.
    FinalDecision,
    /// A human approval or denial was stored in the consent cache.
    ConsentRecorded,
    /// A caller reached the denial threshold; auto-approval disabled.
    BreakerTripped,
    /// A human explicitly cleared a caller's lockout.
    BreakerReset,
}

/// The verdict recorded for a decision point.
///
/// Mirrors the authorization decision without depending on the policy crate,
/// plus `Error` for layers that failed internally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerdict {
    Safe,
    Blocked,
    NeedsApproval,
    Error,
}

/// A single audit record — one line in the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this record.
    pub event_id: Uuid,

    /// When the decision was made (UTC).
    pub timestamp: DateTime<Utc>,

    /// The stage or agent that requested the action.
    pub caller: String,

    /// What kind of decision point this is.
    pub action: AuditAction,

    /// Canonical action signature (e.g., "shell:git push origin main").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Which layer decided (e.g., "sandbox", "validator", "trust", "consent").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,

    /// The verdict at this decision point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<AuditVerdict>,

    /// Plain-language explanation of the verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Hash of the previous line in the log. None for the first record.
    pub previous_hash: Option<String>,

    /// Free-form extra data (e.g., denial counters).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Create a record stamped with the current time and a fresh id.
    pub fn new(caller: impl Into<String>, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            caller: caller.into(),
            action,
            signature: None,
            layer: None,
            verdict: None,
            reason: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_verdict(mut self, verdict: AuditVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
