//! # wp-store
//!
//! Atomic, schema-versioned JSON persistence for Waypoint.
//!
//! Every durable file Waypoint owns (checkpoints, the batch state file,
//! pipeline logs, the consent store) goes through this crate instead of ad hoc
//! `fs::write` calls. Two guarantees hold for every write and read:
//!
//! - **Atomic write**: data lands in a temp file in the same directory and is
//!   renamed over the target, so a crash mid-write never leaves a half-written
//!   file visible to readers.
//! - **Missing means empty**: readers get `Ok(None)` for a file that does not
//!   exist yet, never an error.
//!
//! Documents that implement [`Versioned`] are additionally checked against the
//! schema version this build understands.

pub mod error;
pub mod io;

pub use error::StoreError;
pub use io::{atomic_write, read_json, read_versioned, write_json, Versioned};
