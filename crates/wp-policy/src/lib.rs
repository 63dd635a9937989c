//! # wp-policy
//!
//! Declarative security policy for Waypoint.
//!
//! A [`SecurityPolicy`] file lists allowed and blocked path prefixes, command
//! glob patterns, and the risk class of common commands. The [`PolicyStore`]
//! loads it once and answers two questions for the authorization pipeline:
//!
//! - which rule, if any, matches an action ([`CommandRule`], [`PathRule`]);
//! - what [`RiskClass`] the action falls into.
//!
//! ## Key invariants
//!
//! - **Fail closed**: a missing or malformed policy file never becomes a
//!   permissive policy. The store remembers the failure and classifies every
//!   action as [`RiskClass::Unknown`].
//! - **Deterministic**: matching is literal prefix and glob matching only.
//!   There is no intent inference.

pub mod action;
pub mod decision;
pub mod error;
pub mod policy;
pub mod store;

pub use action::ToolAction;
pub use decision::PolicyDecision;
pub use error::PolicyError;
pub use policy::{CommandRules, NetworkRules, PathRules, RiskRules, SecurityPolicy};
pub use store::{CommandRule, PathRule, PolicyState, PolicyStore, RiskClass};
