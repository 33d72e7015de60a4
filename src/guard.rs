//! Higher-order guard for protected operations.
//!
//! Wraps an async operation with an admission check: the identifier is
//! derived from call context by a caller-supplied closure, the limit is
//! checked first, and the operation runs only when admitted. This is the
//! explicit replacement for attribute-driven interception: the limiter
//! and the key derivation are plain arguments, which keeps lifetimes and
//! test isolation obvious.

use crate::error::{RateLimitError, Result};
use crate::limiter::RateLimiter;
use std::future::Future;

/// Run `op` only if `rule_key` admits the identifier produced by
/// `key_fn`. Rejection surfaces as [`RateLimitError::LimitExceeded`]
/// carrying the retry hint; malformed inputs surface as `InvalidInput`.
pub async fn protect<T, K, F, Fut>(
    limiter: &RateLimiter,
    rule_key: &str,
    key_fn: K,
    op: F,
) -> Result<T>
where
    K: FnOnce() -> String,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let identifier = key_fn();
    let decision = limiter.check_limit(rule_key, &identifier).await?;
    if !decision.allowed {
        return Err(RateLimitError::LimitExceeded {
            retry_after_secs: decision.retry_after_secs,
        });
    }
    Ok(op().await)
}
