use crate::rule::RateLimitRule;
use dashmap::DashMap;
use std::collections::HashMap;

/// Process-wide mapping from rule key to rule definition.
///
/// Backed by a sharded concurrent map, so registration and lookup from
/// many tasks never serialize on one lock. Rules are not persisted;
/// callers re-register at startup.
#[derive(Default)]
pub struct RuleRegistry {
    rules: DashMap<String, RateLimitRule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert: an existing rule under the same key is replaced.
    pub fn register(&self, rule: RateLimitRule) {
        self.rules.insert(rule.key.clone(), rule);
    }

    /// Remove a rule. Subsequent checks against the key are unlimited.
    pub fn remove(&self, key: &str) -> Option<RateLimitRule> {
        self.rules.remove(key).map(|(_, rule)| rule)
    }

    pub fn get(&self, key: &str) -> Option<RateLimitRule> {
        self.rules.get(key).map(|entry| entry.value().clone())
    }

    /// Defensive copy of the whole rule set.
    pub fn list(&self) -> HashMap<String, RateLimitRule> {
        self.rules
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
