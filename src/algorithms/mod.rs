//! Rate limiting algorithm executors.
//!
//! Each executor performs exactly one atomic store operation per check and
//! maps the reply tuple to a [`RateLimitDecision`]. All timestamps are
//! epoch milliseconds supplied by the caller side, so the store never
//! consults its own clock. The `check_at` entry points exist so tests can
//! drive synthetic time; `check` is the production path.

pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use crate::decision::RateLimitDecision;
use crate::error::{RateLimitError, Result};
use crate::rule::RateLimitRule;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

/// Common interface over the four executors.
#[async_trait]
pub trait AlgorithmExecutor: Send + Sync {
    /// Check-and-consume one permit for `identifier` under `rule`.
    async fn check(&self, rule: &RateLimitRule, identifier: &str) -> Result<RateLimitDecision>;

    /// Non-consuming estimate of the remaining budget. Read-only and not
    /// atomic with concurrent checks.
    async fn remaining(&self, rule: &RateLimitRule, identifier: &str) -> Result<u64>;
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Pull one field out of a script reply, treating a short reply as a
/// store-side failure (which the dispatcher then fails open on).
pub(crate) fn reply_field(reply: &[i64], index: usize) -> Result<i64> {
    reply.get(index).copied().ok_or_else(|| {
        RateLimitError::Store(format!(
            "malformed script reply: expected at least {} fields, got {}",
            index + 1,
            reply.len()
        ))
    })
}

/// Round a millisecond wait up to whole seconds.
pub(crate) fn wait_secs(wait_ms: i64) -> u64 {
    ((wait_ms.max(0) as u64) + 999) / 1000
}
