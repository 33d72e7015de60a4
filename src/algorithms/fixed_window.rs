//! Fixed window counter.
//!
//! Requests are counted in aligned, non-overlapping buckets of the rule's
//! window length; the store key embeds the bucket start so a new bucket
//! begins with a fresh counter. Up to `2 * permits` requests can land
//! across two adjacent buckets near a boundary; that burst profile is a
//! property of the algorithm, not a defect.

use super::{now_millis, reply_field, AlgorithmExecutor};
use crate::decision::RateLimitDecision;
use crate::error::Result;
use crate::rule::RateLimitRule;
use crate::store::{AtomicOp, AtomicStore, OP_ALLOWED};
use async_trait::async_trait;
use std::sync::Arc;

pub struct FixedWindow {
    store: Arc<dyn AtomicStore>,
    prefix: String,
}

impl FixedWindow {
    pub fn new(store: Arc<dyn AtomicStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, rule: &RateLimitRule, identifier: &str, window_start: u64) -> String {
        format!(
            "{}:fw:{}:{}:{}",
            self.prefix, rule.key, identifier, window_start
        )
    }

    fn window_start(rule: &RateLimitRule, now_ms: u64) -> u64 {
        let window_secs = rule.window.as_secs();
        let now_secs = now_ms / 1000;
        now_secs / window_secs * window_secs
    }

    pub(crate) async fn check_at(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let key = self.key(rule, identifier, Self::window_start(rule, now_ms));
        let args = [rule.permits.to_string(), rule.window.as_secs().to_string()];
        let reply = self
            .store
            .run(AtomicOp::FixedWindowAcquire, &[&key], &args)
            .await?;

        let reset_secs = reply_field(&reply, 2)?.max(0) as u64;
        if reply_field(&reply, 0)? == OP_ALLOWED {
            Ok(RateLimitDecision::allow(
                reply_field(&reply, 1)?.max(0) as u64,
                reset_secs,
            ))
        } else {
            Ok(RateLimitDecision::reject(reset_secs))
        }
    }
}

#[async_trait]
impl AlgorithmExecutor for FixedWindow {
    async fn check(&self, rule: &RateLimitRule, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(rule, identifier, now_millis()).await
    }

    async fn remaining(&self, rule: &RateLimitRule, identifier: &str) -> Result<u64> {
        let key = self.key(rule, identifier, Self::window_start(rule, now_millis()));
        let count = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().unwrap_or(0),
            None => 0,
        };
        Ok(rule.permits.saturating_sub(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Algorithm;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn rule() -> RateLimitRule {
        RateLimitRule::new(
            "login",
            3,
            Duration::from_secs(60),
            Algorithm::FixedWindow,
            "",
        )
    }

    fn executor() -> FixedWindow {
        FixedWindow::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn admits_exactly_permits_per_window() {
        let executor = executor();
        let rule = rule();
        let now = 1_700_000_000_000;

        for expected in [2, 1, 0] {
            let decision = executor.check_at(&rule, "ip:1.2.3.4", now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }
        let decision = executor.check_at(&rule, "ip:1.2.3.4", now).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs <= 60);
    }

    #[tokio::test]
    async fn fresh_counter_after_window_boundary() {
        let executor = executor();
        let rule = rule();
        let now = 1_700_000_000_000;

        for _ in 0..3 {
            executor.check_at(&rule, "ip:1.2.3.4", now).await.unwrap();
        }
        assert!(!executor.check_at(&rule, "ip:1.2.3.4", now).await.unwrap().allowed);

        // next aligned window starts with a zero count
        let next_window = now + 60_000;
        let decision = executor
            .check_at(&rule, "ip:1.2.3.4", next_window)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn identifiers_do_not_share_counters() {
        let executor = executor();
        let rule = rule();
        let now = 1_700_000_000_000;

        for _ in 0..3 {
            executor.check_at(&rule, "ip:1.1.1.1", now).await.unwrap();
        }
        assert!(!executor.check_at(&rule, "ip:1.1.1.1", now).await.unwrap().allowed);
        assert!(executor.check_at(&rule, "ip:2.2.2.2", now).await.unwrap().allowed);
    }
}
