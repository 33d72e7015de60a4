//! Sliding window log.
//!
//! Every admitted request leaves a timestamped member in a per-identifier
//! sorted set; a check prunes members older than the window, counts what
//! is left and inserts the new request if the count is under the limit.
//! Tighter burst bound than the fixed window, at the cost of one stored
//! member per in-window request.

use super::{now_millis, reply_field, AlgorithmExecutor};
use crate::decision::RateLimitDecision;
use crate::error::Result;
use crate::rule::RateLimitRule;
use crate::store::{AtomicOp, AtomicStore, OP_ALLOWED};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub struct SlidingWindow {
    store: Arc<dyn AtomicStore>,
    prefix: String,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn AtomicStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, rule: &RateLimitRule, identifier: &str) -> String {
        format!("{}:sw:{}:{}", self.prefix, rule.key, identifier)
    }

    pub(crate) async fn check_at(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let key = self.key(rule, identifier);
        let window_ms = rule.window.as_millis() as u64;
        // nonce keeps members unique when two checks share a timestamp
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let args = [
            rule.permits.to_string(),
            window_ms.to_string(),
            now_ms.to_string(),
            member,
        ];
        let reply = self
            .store
            .run(AtomicOp::SlidingWindowAcquire, &[&key], &args)
            .await?;

        let reset_secs = rule.window.as_secs();
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
impl AlgorithmExecutor for SlidingWindow {
    async fn check(&self, rule: &RateLimitRule, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(rule, identifier, now_millis()).await
    }

    async fn remaining(&self, rule: &RateLimitRule, identifier: &str) -> Result<u64> {
        let key = self.key(rule, identifier);
        let now_ms = now_millis();
        let window_ms = rule.window.as_millis() as u64;
        self.store
            .zset_prune(&key, now_ms.saturating_sub(window_ms))
            .await?;
        let in_window = self.store.zset_len(&key).await?;
        Ok(rule.permits.saturating_sub(in_window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Algorithm;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn rule(permits: u64) -> RateLimitRule {
        RateLimitRule::new(
            "api",
            permits,
            Duration::from_secs(10),
            Algorithm::SlidingWindow,
            "",
        )
    }

    fn executor() -> SlidingWindow {
        SlidingWindow::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn admits_exactly_permits_in_window() {
        let executor = executor();
        let rule = rule(4);
        let now = 1_700_000_000_000;

        for expected in [3, 2, 1, 0] {
            let decision = executor.check_at(&rule, "user:7", now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }
        assert!(!executor.check_at(&rule, "user:7", now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn burst_ages_out_of_the_window() {
        let executor = executor();
        let rule = rule(3);
        let t0 = 1_700_000_000_000;

        for _ in 0..3 {
            assert!(executor.check_at(&rule, "user:7", t0).await.unwrap().allowed);
        }
        // still inside the window: rejected
        assert!(!executor
            .check_at(&rule, "user:7", t0 + 5)
            .await
            .unwrap()
            .allowed);
        // once the burst has aged past t0 + W, one slot frees up
        let decision = executor
            .check_at(&rule, "user:7", t0 + 10_001)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn window_slides_rather_than_resets() {
        let executor = executor();
        let rule = rule(2);
        let t0 = 1_700_000_000_000;

        assert!(executor.check_at(&rule, "u", t0).await.unwrap().allowed);
        assert!(executor.check_at(&rule, "u", t0 + 6_000).await.unwrap().allowed);
        // t0 has aged out at t0+11s but t0+6s has not
        assert!(executor.check_at(&rule, "u", t0 + 11_000).await.unwrap().allowed);
        assert!(!executor.check_at(&rule, "u", t0 + 11_500).await.unwrap().allowed);
    }
}
