use crate::algorithms::{
    AlgorithmExecutor, FixedWindow, LeakyBucket, SlidingWindow, TokenBucket,
};
use crate::decision::RateLimitDecision;
use crate::error::{RateLimitError, Result};
use crate::registry::RuleRegistry;
use crate::rule::{default_rules, Algorithm, RateLimitRule};
use crate::stats::{StatsEntry, StatsKey, StatsTracker};
use crate::store::AtomicStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The rate limiting engine: rule registry, stats tracker and the four
/// algorithm executors behind one entry point.
///
/// Constructed once and shared by reference (or cheap `Arc`) across all
/// call sites; there is no global instance. Failure policy: a store or
/// script failure never reaches the caller; the check fails open and the
/// gap is logged at `warn` so operators can see enforcement was skipped.
pub struct RateLimiter {
    registry: RuleRegistry,
    stats: StatsTracker,
    store: Arc<dyn AtomicStore>,
    fixed_window: FixedWindow,
    sliding_window: SlidingWindow,
    token_bucket: TokenBucket,
    leaky_bucket: LeakyBucket,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AtomicStore>, key_prefix: &str) -> Self {
        Self {
            registry: RuleRegistry::new(),
            stats: StatsTracker::new(),
            fixed_window: FixedWindow::new(store.clone(), key_prefix),
            sliding_window: SlidingWindow::new(store.clone(), key_prefix),
            token_bucket: TokenBucket::new(store.clone(), key_prefix),
            leaky_bucket: LeakyBucket::new(store.clone(), key_prefix),
            store,
        }
    }

    /// Engine pre-loaded with the illustrative startup rule set.
    pub fn with_default_rules(store: Arc<dyn AtomicStore>, key_prefix: &str) -> Self {
        let limiter = Self::new(store, key_prefix);
        for rule in default_rules() {
            limiter.registry.register(rule);
        }
        limiter
    }

    fn executor(&self, algorithm: Algorithm) -> &dyn AlgorithmExecutor {
        match algorithm {
            Algorithm::FixedWindow => &self.fixed_window,
            Algorithm::SlidingWindow => &self.sliding_window,
            Algorithm::TokenBucket => &self.token_bucket,
            Algorithm::LeakyBucket => &self.leaky_bucket,
        }
    }

    /// Check and consume one permit for `identifier` under the rule named
    /// `rule_key`.
    ///
    /// Returns `Err` only for malformed input. An unregistered rule key
    /// means unlimited (a deliberate code path, not a failure), and any
    /// store failure converts to an unlimited allow.
    pub async fn check_limit(
        &self,
        rule_key: &str,
        identifier: &str,
    ) -> Result<RateLimitDecision> {
        if rule_key.trim().is_empty() {
            return Err(RateLimitError::InvalidInput(
                "rule key must not be empty".to_string(),
            ));
        }
        if identifier.trim().is_empty() {
            return Err(RateLimitError::InvalidInput(
                "identifier must not be empty".to_string(),
            ));
        }

        let rule = match self.registry.get(rule_key) {
            Some(rule) => rule,
            None => {
                debug!(rule = rule_key, "no rule configured, allowing");
                return Ok(RateLimitDecision::unlimited("no rule configured"));
            }
        };

        let decision = match self.executor(rule.algorithm).check(&rule, identifier).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    rule = rule_key,
                    identifier,
                    error = %err,
                    "rate limit check failed, failing open"
                );
                RateLimitDecision::unlimited("store unavailable, failing open")
            }
        };

        if decision.allowed {
            self.stats.record_allow(rule_key, identifier);
        } else {
            self.stats.record_reject(rule_key, identifier);
        }
        debug!(
            rule = rule_key,
            identifier,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "rate limit check"
        );
        Ok(decision)
    }

    /// Non-consuming estimate of the remaining budget for a pair. Not
    /// atomic with concurrent checks; `u64::MAX` for unregistered keys.
    pub async fn remaining(&self, rule_key: &str, identifier: &str) -> Result<u64> {
        match self.registry.get(rule_key) {
            Some(rule) => {
                self.executor(rule.algorithm)
                    .remaining(&rule, identifier)
                    .await
            }
            None => Ok(u64::MAX),
        }
    }

    /// Upsert a rule after validating it.
    pub fn register_rule(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        debug!(rule = %rule.key, algorithm = %rule.algorithm, permits = rule.permits, "rule registered");
        self.registry.register(rule);
        Ok(())
    }

    /// Remove a rule; subsequent checks for the key are unlimited.
    pub fn remove_rule(&self, key: &str) -> Option<RateLimitRule> {
        self.registry.remove(key)
    }

    pub fn list_rules(&self) -> HashMap<String, RateLimitRule> {
        self.registry.list()
    }

    pub fn list_stats(&self) -> HashMap<StatsKey, StatsEntry> {
        self.stats.snapshot()
    }

    /// Drop stats entries idle longer than `cutoff`; returns how many
    /// were removed.
    pub fn sweep_expired_stats(&self, cutoff: Duration) -> usize {
        let removed = self.stats.sweep(cutoff);
        if removed > 0 {
            debug!(removed, "swept idle stats entries");
        }
        removed
    }

    /// Liveness of the shared store. Checks degrade to fail-open while
    /// this is false.
    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AtomicOp, MemoryStore};
    use async_trait::async_trait;

    /// Store double whose every operation fails, for fail-open coverage.
    struct FailingStore;

    #[async_trait]
    impl AtomicStore for FailingStore {
        async fn run(&self, _: AtomicOp, _: &[&str], _: &[String]) -> Result<Vec<i64>> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn ttl_secs(&self, _: &str) -> Result<i64> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn hash_get(&self, _: &str, _: &[&str]) -> Result<Vec<Option<String>>> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn zset_prune(&self, _: &str, _: u64) -> Result<u64> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn zset_len(&self, _: &str) -> Result<u64> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
        async fn ping(&self) -> Result<()> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
    }

    /// A sliding-window login rule keeps these wall-clock tests away from
    /// aligned fixed-window boundaries.
    fn limiter() -> RateLimiter {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), "test");
        limiter
            .register_rule(RateLimitRule::new(
                "login",
                5,
                Duration::from_secs(60),
                Algorithm::SlidingWindow,
                "login attempts",
            ))
            .unwrap();
        limiter
    }

    #[tokio::test]
    async fn empty_inputs_are_caller_errors() {
        let limiter = limiter();
        assert!(matches!(
            limiter.check_limit("", "ip:1").await,
            Err(RateLimitError::InvalidInput(_))
        ));
        assert!(matches!(
            limiter.check_limit("login", "  ").await,
            Err(RateLimitError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_key_is_unlimited() {
        let limiter = limiter();
        for _ in 0..1000 {
            let decision = limiter.check_limit("never-registered", "ip:1").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, u64::MAX);
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = RateLimiter::with_default_rules(Arc::new(FailingStore), "test");
        for _ in 0..10 {
            let decision = limiter.check_limit("login", "ip:1").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, u64::MAX);
            assert_eq!(decision.reason, "store unavailable, failing open");
        }
        assert!(!limiter.store_healthy().await);
    }

    #[tokio::test]
    async fn outcomes_are_recorded_in_stats() {
        let limiter = limiter();
        for _ in 0..6 {
            limiter.check_limit("login", "ip:1.2.3.4").await.unwrap();
        }
        let stats = limiter.list_stats();
        let entry = &stats[&StatsKey {
            rule_key: "login".to_string(),
            identifier: "ip:1.2.3.4".to_string(),
        }];
        assert_eq!(entry.total_requests, 6);
        assert_eq!(entry.allowed_requests, 5);
        assert_eq!(entry.rejected_requests, 1);
    }

    #[tokio::test]
    async fn register_rule_validates() {
        let limiter = limiter();
        let bad = RateLimitRule::new(
            "broken",
            0,
            Duration::from_secs(60),
            Algorithm::FixedWindow,
            "",
        );
        assert!(matches!(
            limiter.register_rule(bad),
            Err(RateLimitError::InvalidRule(_))
        ));
        assert!(limiter.list_rules().get("broken").is_none());
    }

    #[tokio::test]
    async fn removed_rule_becomes_unlimited() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.check_limit("login", "ip:9").await.unwrap();
        }
        assert!(!limiter.check_limit("login", "ip:9").await.unwrap().allowed);

        limiter.remove_rule("login");
        let decision = limiter.check_limit("login", "ip:9").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, u64::MAX);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let limiter = limiter();
        limiter.check_limit("login", "ip:8").await.unwrap();
        assert_eq!(limiter.remaining("login", "ip:8").await.unwrap(), 4);
        assert_eq!(limiter.remaining("login", "ip:8").await.unwrap(), 4);
        assert_eq!(limiter.remaining("unknown", "ip:8").await.unwrap(), u64::MAX);
    }
}
