//! # wp-authz
//!
//! The authorization pipeline every externally visible action passes
//! through before a stage may perform it.
//!
//! Four layers run in order:
//!
//! 1. [`SandboxLayer`] maps the action onto the security policy's rule table.
//! 2. [`ValidatorLayer`] rejects `..` traversal (plain or percent-encoded),
//!    symlink escapes out of the workspace, and shell metacharacters.
//! 3. [`TrustLayer`] forces approval for callers off the allowlist.
//! 4. [`ConsentLayer`] settles `NeedsApproval` from the consent cache or by
//!    asking an [`ApprovalPrompt`], and feeds the circuit breaker.
//!
//! `Blocked` from any layer ends evaluation. Every layer verdict and the
//! final decision are appended to the hash-chained audit log.

pub mod consent;
pub mod error;
pub mod layer;
pub mod pipeline;
pub mod sandbox;
pub mod trust;
pub mod validator;

pub use consent::{ApprovalPrompt, ApprovalRequest, ApprovalResponse, ConsentLayer, DeferredPrompt};
pub use error::{AuthzError, ValidationError};
pub use layer::{AuthorizationLayer, LayerContext, LayerRole};
pub use pipeline::{AuthorizationOutcome, AuthorizationPipeline, LayerVerdict};
pub use sandbox::SandboxLayer;
pub use trust::TrustLayer;
pub use validator::ValidatorLayer;
