//! Leaky bucket.
//!
//! The dual of the token bucket: admissions pour one unit of volume into
//! a bucket that drains continuously at `permits / window` per second,
//! and a full bucket rejects. This bounds outstanding work in flight and
//! yields smoother admission under sustained load than the token bucket's
//! burst-then-steady profile. Volume starts at zero, so a cold identifier
//! still gets an initial burst of `permits` before the drain rate governs.

use super::{now_millis, reply_field, wait_secs, AlgorithmExecutor};
use crate::decision::RateLimitDecision;
use crate::error::Result;
use crate::rule::RateLimitRule;
use crate::store::{AtomicOp, AtomicStore, OP_ALLOWED};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LeakyBucket {
    store: Arc<dyn AtomicStore>,
    prefix: String,
}

impl LeakyBucket {
    pub fn new(store: Arc<dyn AtomicStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, rule: &RateLimitRule, identifier: &str) -> String {
        format!("{}:lb:{}:{}", self.prefix, rule.key, identifier)
    }

    pub(crate) async fn check_at(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let key = self.key(rule, identifier);
        let window_ms = rule.window.as_millis() as u64;
        let args = [
            rule.permits.to_string(),
            rule.rate_per_ms().to_string(),
            now_ms.to_string(),
            window_ms.to_string(),
        ];
        let reply = self
            .store
            .run(AtomicOp::LeakyBucketAcquire, &[&key], &args)
            .await?;

        if reply_field(&reply, 0)? == OP_ALLOWED {
            Ok(RateLimitDecision::allow(
                reply_field(&reply, 1)?.max(0) as u64,
                0,
            ))
        } else {
            Ok(RateLimitDecision::reject(wait_secs(reply_field(&reply, 2)?)))
        }
    }
}

#[async_trait]
impl AlgorithmExecutor for LeakyBucket {
    async fn check(&self, rule: &RateLimitRule, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(rule, identifier, now_millis()).await
    }

    async fn remaining(&self, rule: &RateLimitRule, identifier: &str) -> Result<u64> {
        let key = self.key(rule, identifier);
        let state = self.store.hash_get(&key, &["volume", "last_leak"]).await?;
        let volume = state.first().cloned().flatten();
        let last_leak = state.get(1).cloned().flatten();
        match (volume, last_leak) {
            (Some(volume), Some(last_leak)) => {
                let volume: f64 = volume.parse().unwrap_or(0.0);
                let last_leak: f64 = last_leak.parse().unwrap_or(0.0);
                let elapsed = (now_millis() as f64 - last_leak).max(0.0);
                let drained = (volume - elapsed * rule.rate_per_ms()).max(0.0);
                Ok((rule.permits as f64 - drained).floor().max(0.0) as u64)
            }
            // no state yet: empty bucket
            _ => Ok(rule.permits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Algorithm;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn rule(permits: u64, window_secs: u64) -> RateLimitRule {
        RateLimitRule::new(
            "sms",
            permits,
            Duration::from_secs(window_secs),
            Algorithm::LeakyBucket,
            "",
        )
    }

    fn executor() -> LeakyBucket {
        LeakyBucket::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn fills_to_capacity_then_rejects() {
        let executor = executor();
        let rule = rule(3, 60);
        let now = 1_700_000_000_000;

        for expected in [2, 1, 0] {
            let decision = executor.check_at(&rule, "u", now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }
        let decision = executor.check_at(&rule, "u", now).await.unwrap();
        assert!(!decision.allowed);
        // one unit drains in 60/3 = 20s
        assert!((20..=21).contains(&decision.retry_after_secs));
    }

    #[tokio::test]
    async fn drain_rate_frees_one_slot() {
        let executor = executor();
        let rule = rule(3, 60);
        let now = 1_700_000_000_000;

        for _ in 0..3 {
            executor.check_at(&rule, "u", now).await.unwrap();
        }
        assert!(!executor.check_at(&rule, "u", now).await.unwrap().allowed);

        // just under one 20s drain interval later: the fractional drain
        // leaves room for exactly one admission
        let later = now + 19_990;
        assert!(executor.check_at(&rule, "u", later).await.unwrap().allowed);
        assert!(!executor.check_at(&rule, "u", later).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn idle_bucket_drains_to_empty() {
        let executor = executor();
        let rule = rule(2, 10);
        let now = 1_700_000_000_000;

        assert!(executor.check_at(&rule, "u", now).await.unwrap().allowed);
        assert!(executor.check_at(&rule, "u", now).await.unwrap().allowed);
        assert!(!executor.check_at(&rule, "u", now).await.unwrap().allowed);

        // a full window with no traffic empties the bucket again
        let later = now + 10_010;
        let decision = executor.check_at(&rule, "u", later).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }
}
