use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifies one tracked (rule, identifier) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StatsKey {
    pub rule_key: String,
    pub identifier: String,
}

/// Allow/reject counters for one (rule, identifier) pair.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsEntry {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,
    /// Epoch milliseconds of the most recent check; 0 until first seen.
    pub last_request_ms: u64,
}

/// Process-local admission counters, keyed by (rule, identifier).
///
/// Entries are created lazily on first check and never expire on their
/// own; `sweep` bounds memory against ever-growing identifier cardinality
/// (rotating client IPs and the like).
#[derive(Default)]
pub struct StatsTracker {
    entries: DashMap<StatsKey, StatsEntry>,
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allow(&self, rule_key: &str, identifier: &str) {
        self.record(rule_key, identifier, true);
    }

    pub fn record_reject(&self, rule_key: &str, identifier: &str) {
        self.record(rule_key, identifier, false);
    }

    fn record(&self, rule_key: &str, identifier: &str, allowed: bool) {
        let key = StatsKey {
            rule_key: rule_key.to_string(),
            identifier: identifier.to_string(),
        };
        let mut entry = self.entries.entry(key).or_default();
        entry.total_requests += 1;
        if allowed {
            entry.allowed_requests += 1;
        } else {
            entry.rejected_requests += 1;
        }
        entry.last_request_ms = epoch_millis();
    }

    /// Read-only copy for monitoring.
    pub fn snapshot(&self) -> HashMap<StatsKey, StatsEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Remove entries idle for longer than `cutoff`. Returns how many
    /// were removed.
    ///
    /// Removals are counted inside the retain pass; checks may keep
    /// inserting entries while the sweep runs, so a before/after length
    /// comparison would be meaningless.
    pub fn sweep(&self, cutoff: Duration) -> usize {
        let horizon = epoch_millis().saturating_sub(cutoff.as_millis() as u64);
        let removed = AtomicUsize::new(0);
        self.entries.retain(|_, entry| {
            if entry.last_request_ms >= horizon {
                true
            } else {
                removed.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
        removed.into_inner()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
