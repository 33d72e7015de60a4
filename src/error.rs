use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the rate limiting engine.
///
/// Store-related variants never escape [`crate::RateLimiter::check_limit`];
/// they are converted to fail-open allows at the dispatcher boundary.
/// Callers only ever see `InvalidInput` (malformed arguments) and, from the
/// guard wrapper, `LimitExceeded`.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    LimitExceeded { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RateLimitError>;
