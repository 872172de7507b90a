//! Replay protection for single-use proofs
//!
//! A consumed key stays recorded until the retention window passes. The
//! window only bounds memory: QR proofs expire well before it ends, so an
//! expired proof is rejected on its own validity before the guard is asked.

use std::collections::HashMap;
use std::time::Duration;

use geomesh_core::Timestamp;

/// How long consumed keys are remembered
pub const DEFAULT_REPLAY_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Tracks consumed single-use keys
#[derive(Debug)]
pub struct ReplayGuard {
    /// Key -> time of consumption
    consumed: HashMap<String, Timestamp>,
    retention: Duration,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_REPLAY_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        ReplayGuard {
            consumed: HashMap::new(),
            retention,
        }
    }

    /// Check whether a key was already consumed
    pub fn is_consumed(&self, key: &str) -> bool {
        self.consumed.contains_key(key)
    }

    /// Consume a key.
    /// Returns true on first use, false if the key was already consumed.
    pub fn consume(&mut self, key: &str, now: Timestamp) -> bool {
        if self.consumed.contains_key(key) {
            return false;
        }
        self.consumed.insert(key.to_string(), now);
        true
    }

    /// Forget keys consumed longer ago than the retention window.
    /// Returns the number of purged keys.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let before = self.consumed.len();
        let cutoff = now - self.retention;
        self.consumed.retain(|_, consumed_at| *consumed_at > cutoff);
        before - self.consumed.len()
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
