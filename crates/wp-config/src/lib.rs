//! # wp-config
//!
//! One immutable [`WaypointConfig`] built at startup and passed by reference
//! to every component. Values are layered:
//!
//! 1. built-in defaults ([`WaypointConfig::for_project`])
//! 2. `.waypoint/config.toml`, if present
//! 3. `WAYPOINT_*` environment variables
//!
//! A value that fails to parse at any layer is a [`ConfigError`]; nothing is
//! silently replaced by a default.

pub mod config;
pub mod error;

pub use config::{
    WaypointConfig, CANONICAL_CALLERS, DEFAULT_CHECKPOINT_RETENTION, DEFAULT_HOOK_TIMEOUT_MS,
    DEFAULT_STAGE_RETRY_LIMIT, DEFAULT_STAGE_TIMEOUT_SECS, STATE_DIR_NAME,
};
pub use error::ConfigError;
