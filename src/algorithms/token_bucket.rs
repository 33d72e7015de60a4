//! Token bucket.
//!
//! A bucket of `permits` tokens refills continuously at
//! `permits / window` tokens per second; each admission consumes one.
//! The bucket starts full, so a cold identifier can burst up to capacity
//! and then settles at the refill rate. A rejected check still persists
//! the refreshed timestamp so partial refill is never lost.
//!
//! Bucket state expires after one idle window; an expired hash
//! re-initializes to a full bucket, which is exactly what a full window
//! of refill would have produced.

use super::{now_millis, reply_field, wait_secs, AlgorithmExecutor};
use crate::decision::RateLimitDecision;
use crate::error::Result;
use crate::rule::RateLimitRule;
use crate::store::{AtomicOp, AtomicStore, OP_ALLOWED};
use async_trait::async_trait;
use std::sync::Arc;

pub struct TokenBucket {
    store: Arc<dyn AtomicStore>,
    prefix: String,
}

impl TokenBucket {
    pub fn new(store: Arc<dyn AtomicStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, rule: &RateLimitRule, identifier: &str) -> String {
        format!("{}:tb:{}:{}", self.prefix, rule.key, identifier)
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
            .run(AtomicOp::TokenBucketAcquire, &[&key], &args)
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
impl AlgorithmExecutor for TokenBucket {
    async fn check(&self, rule: &RateLimitRule, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(rule, identifier, now_millis()).await
    }

    async fn remaining(&self, rule: &RateLimitRule, identifier: &str) -> Result<u64> {
        let key = self.key(rule, identifier);
        let state = self.store.hash_get(&key, &["tokens", "last_refill"]).await?;
        let tokens = state.first().cloned().flatten();
        let last_refill = state.get(1).cloned().flatten();
        match (tokens, last_refill) {
            (Some(tokens), Some(last_refill)) => {
                let tokens: f64 = tokens.parse().unwrap_or(0.0);
                let last_refill: f64 = last_refill.parse().unwrap_or(0.0);
                let elapsed = (now_millis() as f64 - last_refill).max(0.0);
                let refilled =
                    (tokens + elapsed * rule.rate_per_ms()).min(rule.permits as f64);
                Ok(refilled.floor() as u64)
            }
            // no state yet: bucket is full
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
            "upload",
            permits,
            Duration::from_secs(window_secs),
            Algorithm::TokenBucket,
            "",
        )
    }

    fn executor() -> TokenBucket {
        TokenBucket::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn bursts_up_to_capacity_then_rejects() {
        let executor = executor();
        let rule = rule(5, 60);
        let now = 1_700_000_000_000;

        for expected in [4, 3, 2, 1, 0] {
            let decision = executor.check_at(&rule, "u", now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }
        let decision = executor.check_at(&rule, "u", now).await.unwrap();
        assert!(!decision.allowed);
        // one token refills in 60/5 = 12s (clock-rounding tolerance of 1s)
        assert!((12..=13).contains(&decision.retry_after_secs));
    }

    #[tokio::test]
    async fn one_token_returns_after_refill_interval() {
        let executor = executor();
        let rule = rule(5, 60);
        let now = 1_700_000_000_000;

        for _ in 0..5 {
            executor.check_at(&rule, "u", now).await.unwrap();
        }
        assert!(!executor.check_at(&rule, "u", now).await.unwrap().allowed);

        // ceil(W / C) = 12s later: exactly one more admission (a few extra
        // milliseconds absorb float rounding in the refill product)
        let later = now + 12_010;
        assert!(executor.check_at(&rule, "u", later).await.unwrap().allowed);
        assert!(!executor.check_at(&rule, "u", later).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn rejected_check_keeps_partial_refill() {
        let executor = executor();
        let rule = rule(1, 10);
        let now = 1_700_000_000_000;

        assert!(executor.check_at(&rule, "u", now).await.unwrap().allowed);
        // two rejected checks halfway through the refill interval must not
        // reset the partial refill accumulated so far
        assert!(!executor.check_at(&rule, "u", now + 4_000).await.unwrap().allowed);
        assert!(!executor.check_at(&rule, "u", now + 8_000).await.unwrap().allowed);
        assert!(executor.check_at(&rule, "u", now + 10_010).await.unwrap().allowed);
    }
}
