//! # wp-audit
//!
//! Append-only audit log of authorization decisions for Waypoint.
//!
//! Every layer verdict, final decision, consent outcome, and circuit-breaker
//! transition is recorded as an [`AuditEvent`] in a JSONL log. For `Safe` and
//! `Blocked` verdicts this log is the only durable side effect, so it is
//! hash-chained: each line carries the SHA-256 of the previous line and
//! [`AuditLog::verify_chain`] detects edits, deletions, and insertions.
//!
//! ```rust,no_run
//! use wp_audit::{AuditAction, AuditEvent, AuditLog, AuditVerdict};
//!
//! let mut log = AuditLog::open("/tmp/audit.jsonl").unwrap();
//! let mut event = AuditEvent::new("implement", AuditAction::LayerDecision)
//!     .with_signature("shell:cargo test")
//!     .with_layer("sandbox")
//!     .with_verdict(AuditVerdict::Safe);
//! log.append(&mut event).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod log;

pub use error::AuditError;
pub use event::{AuditAction, AuditEvent, AuditVerdict};
pub use log::AuditLog;
