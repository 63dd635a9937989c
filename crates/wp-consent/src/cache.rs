// cache.rs — ConsentCache: approval memory plus circuit breaker.
//
// Everything lives in one JSON document (`.waypoint/consent.json`):
//
//   {
//     "version": 1,
//     "entries":  [{ "caller", "signature", "approved", "timestamp", "consecutive_denials" }],
//     "breakers": { "<caller>": { "consecutive_denials", "auto_approval_disabled", "tripped_at" } }
//   }
//
// The document is rewritten atomically after every mutation. There is one
// writer per store object; callers that share a store across threads wrap
// it in a Mutex.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wp_store::Versioned;

use crate::error::ConsentError;

/// Denials in a row before a caller loses auto-approval.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// One remembered human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsentEntry {
    pub caller: String,
    pub signature: String,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
    /// The caller's denial streak right after this decision was recorded.
    pub consecutive_denials: u32,
}

/// Per-caller breaker state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub consecutive_denials: u32,
    pub auto_approval_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tripped_at: Option<DateTime<Utc>>,
}

/// What `record` changed.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub entry: ConsentEntry,
    /// True when this decision is the one that tripped the breaker.
    pub tripped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsentDocument {
    #[serde(default = "schema_version")]
    version: u32,
    #[serde(default)]
    entries: Vec<ConsentEntry>,
    #[serde(default)]
    breakers: BTreeMap<String, CircuitBreakerState>,
}

impl Default for ConsentDocument {
    fn default() -> Self {
        Self {
            version: schema_version(),
            entries: Vec::new(),
            breakers: BTreeMap::new(),
        }
    }
}

impl Versioned for ConsentDocument {
    const SCHEMA_VERSION: u32 = 1;
}

fn schema_version() -> u32 {
    ConsentDocument::SCHEMA_VERSION
}

/// Consent decisions keyed by (caller, action signature).
#[derive(Debug)]
pub struct ConsentCache {
    path: Option<PathBuf>,
    threshold: u32,
    doc: ConsentDocument,
}

impl ConsentCache {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>, threshold: u32) -> Result<Self, ConsentError> {
        if threshold == 0 {
            return Err(ConsentError::InvalidThreshold);
        }
        let path = path.as_ref().to_path_buf();
        let doc = wp_store::read_versioned::<ConsentDocument>(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            threshold,
            doc,
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory(threshold: u32) -> Result<Self, ConsentError> {
        if threshold == 0 {
            return Err(ConsentError::InvalidThreshold);
        }
        Ok(Self {
            path: None,
            threshold,
            doc: ConsentDocument::default(),
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Store a human decision and update the caller's breaker.
    ///
    /// An approval resets the denial streak but does not lift a tripped
    /// breaker; only `reset` does that.
    pub fn record(
        &mut self,
        caller: &str,
        signature: &str,
        approved: bool,
    ) -> Result<RecordOutcome, ConsentError> {
        let threshold = self.threshold;
        let mut doc = self.doc.clone();
        let breaker = doc.breakers.entry(caller.to_string()).or_default();
        let mut tripped = false;

        if approved {
            breaker.consecutive_denials = 0;
        } else {
            breaker.consecutive_denials = breaker.consecutive_denials.saturating_add(1);
            if breaker.consecutive_denials >= threshold && !breaker.auto_approval_disabled {
                breaker.auto_approval_disabled = true;
                breaker.tripped_at = Some(Utc::now());
                tripped = true;
            }
        }

        let entry = ConsentEntry {
            caller: caller.to_string(),
            signature: signature.to_string(),
            approved,
            timestamp: Utc::now(),
            consecutive_denials: breaker.consecutive_denials,
        };
        doc.entries
            .retain(|e| !(e.caller == caller && e.signature == signature));
        doc.entries.push(entry.clone());
        self.commit(doc)?;

        if tripped {
            tracing::warn!(
                caller = %caller,
                denials = entry.consecutive_denials,
                "circuit breaker tripped: auto-approval disabled until a human resets it"
            );
        }
        Ok(RecordOutcome { entry, tripped })
    }

    /// The remembered decision for this exact caller and signature.
    pub fn lookup(&self, caller: &str, signature: &str) -> Option<bool> {
        self.entry(caller, signature).map(|e| e.approved)
    }

    pub fn entry(&self, caller: &str, signature: &str) -> Option<&ConsentEntry> {
        self.doc
            .entries
            .iter()
            .find(|e| e.caller == caller && e.signature == signature)
    }

    /// Current denial streak for a caller.
    pub fn denial_count(&self, caller: &str) -> u32 {
        self.doc
            .breakers
            .get(caller)
            .map_or(0, |b| b.consecutive_denials)
    }

    /// Whether the caller's breaker has tripped.
    pub fn is_locked(&self, caller: &str) -> bool {
        self.doc
            .breakers
            .get(caller)
            .is_some_and(|b| b.auto_approval_disabled)
    }

    pub fn breaker(&self, caller: &str) -> Option<&CircuitBreakerState> {
        self.doc.breakers.get(caller)
    }

    pub fn breakers(&self) -> impl Iterator<Item = (&str, &CircuitBreakerState)> {
        self.doc.breakers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entries(&self) -> &[ConsentEntry] {
        &self.doc.entries
    }

    /// Human reset: clear the streak and re-enable auto-approval.
    ///
    /// Returns false if the caller had no breaker state to reset.
    pub fn reset(&mut self, caller: &str) -> Result<bool, ConsentError> {
        if !self.doc.breakers.contains_key(caller) {
            return Ok(false);
        }
        let mut doc = self.doc.clone();
        doc.breakers
            .insert(caller.to_string(), CircuitBreakerState::default());
        self.commit(doc)?;
        tracing::info!(caller = %caller, "circuit breaker reset by operator");
        Ok(true)
    }

    /// Write `doc` to disk, then make it the live document.
    ///
    /// On a failed write the in-memory state is left as it was, so memory and
    /// disk never disagree.
    fn commit(&mut self, doc: ConsentDocument) -> Result<(), ConsentError> {
        if let Some(path) = &self.path {
            wp_store::write_json(path, &doc)?;
        }
        self.doc = doc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lookup_returns_recorded_decision() {
        let mut cache = ConsentCache::in_memory(DEFAULT_THRESHOLD).unwrap();
        assert_eq!(cache.lookup("implementer", "shell:git push"), None);

        cache.record("implementer", "shell:git push", true).unwrap();
        assert_eq!(cache.lookup("implementer", "shell:git push"), Some(true));
        // Keyed per caller.
        assert_eq!(cache.lookup("reviewer", "shell:git push"), None);
    }

    #[test]
    fn newer_decision_replaces_older_one() {
        let mut cache = ConsentCache::in_memory(DEFAULT_THRESHOLD).unwrap();
        cache.record("implementer", "net:https://x", true).unwrap();
        cache.record("implementer", "net:https://x", false).unwrap();
        assert_eq!(cache.lookup("implementer", "net:https://x"), Some(false));
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn denials_count_up_and_approval_resets() {
        let mut cache = ConsentCache::in_memory(DEFAULT_THRESHOLD).unwrap();
        for i in 0..3 {
            cache
                .record("implementer", &format!("shell:cmd{}", i), false)
                .unwrap();
        }
        assert_eq!(cache.denial_count("implementer"), 3);

        cache.record("implementer", "shell:ok", true).unwrap();
        assert_eq!(cache.denial_count("implementer"), 0);
    }

    #[test]
    fn threshold_denials_trip_the_breaker_exactly_once() {
        let mut cache = ConsentCache::in_memory(DEFAULT_THRESHOLD).unwrap();
        let mut trips = 0;
        for i in 0..12 {
            let outcome = cache
                .record("implementer", &format!("shell:cmd{}", i), false)
                .unwrap();
            if outcome.tripped {
                trips += 1;
                assert_eq!(i, 9, "breaker should trip on the tenth denial");
            }
        }
        assert_eq!(trips, 1);
        assert!(cache.is_locked("implementer"));
        assert!(cache.breaker("implementer").unwrap().tripped_at.is_some());
    }

    #[test]
    fn approval_does_not_lift_a_tripped_breaker() {
        let mut cache = ConsentCache::in_memory(2).unwrap();
        cache.record("tester", "a", false).unwrap();
        cache.record("tester", "b", false).unwrap();
        assert!(cache.is_locked("tester"));

        cache.record("tester", "c", true).unwrap();
        assert_eq!(cache.denial_count("tester"), 0);
        assert!(cache.is_locked("tester"));

        assert!(cache.reset("tester").unwrap());
        assert!(!cache.is_locked("tester"));
        assert!(!cache.reset("nobody").unwrap());
    }

    #[test]
    fn decisions_and_breakers_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consent.json");
        {
            let mut cache = ConsentCache::open(&path, 2).unwrap();
            cache.record("implementer", "shell:git push", true).unwrap();
            cache.record("reviewer", "x", false).unwrap();
            cache.record("reviewer", "y", false).unwrap();
        }

        let cache = ConsentCache::open(&path, 2).unwrap();
        assert_eq!(cache.lookup("implementer", "shell:git push"), Some(true));
        assert!(cache.is_locked("reviewer"));
        assert_eq!(cache.entry("reviewer", "y").unwrap().consecutive_denials, 2);
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let cache = ConsentCache::open(dir.path().join("consent.json"), 10).unwrap();
        assert!(cache.entries().is_empty());
        assert_eq!(cache.denial_count("anyone"), 0);
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consent.json");
        std::fs::write(&path, "{\"entries\": [").unwrap();
        assert!(matches!(
            ConsentCache::open(&path, 10),
            Err(ConsentError::Store(_))
        ));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(matches!(
            ConsentCache::in_memory(0),
            Err(ConsentError::InvalidThreshold)
        ));
    }

    #[test]
    fn failed_write_leaves_memory_matching_disk() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let mut cache = ConsentCache::open(state_dir.join("consent.json"), 2).unwrap();
        cache.record("commit", "shell:git push", false).unwrap();

        // A file where the state directory should be makes every write fail.
        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, "not a directory").unwrap();

        assert!(cache.record("commit", "shell:git tag v1", false).is_err());
        assert_eq!(cache.denial_count("commit"), 1);
        assert!(!cache.is_locked("commit"));
        assert_eq!(cache.lookup("commit", "shell:git tag v1"), None);
        assert_eq!(cache.entries().len(), 1);

        std::fs::remove_file(&state_dir).unwrap();
        let outcome = cache.record("commit", "shell:git tag v1", false).unwrap();
        assert!(outcome.tripped);
        assert!(cache.is_locked("commit"));
    }
}
