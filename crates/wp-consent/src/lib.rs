//! # wp-consent
//!
//! Persisted human consent decisions and the per-caller circuit breaker.
//!
//! A [`ConsentCache`] remembers whether a human approved or denied a given
//! action signature for a given caller, so identical requests do not prompt
//! twice. Every denial also feeds that caller's [`CircuitBreakerState`]:
//!
//! - each denial increments `consecutive_denials`;
//! - an explicit approval resets the counter to zero;
//! - when the counter reaches the threshold (default 10),
//!   `auto_approval_disabled` flips on and stays on until [`ConsentCache::reset`]
//!   is called by a human. Time passing never clears it.

pub mod cache;
pub mod error;

pub use cache::{CircuitBreakerState, ConsentCache, ConsentEntry, RecordOutcome, DEFAULT_THRESHOLD};
pub use error::ConsentError;
