use serde::{Deserialize, Serialize};

/// Outcome of a single rate limit check.
///
/// `retry_after_secs` carries the window reset time for the counting
/// algorithms and the computed wait time for the bucket algorithms; it is
/// zero whenever the caller does not need to wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_secs: u64,
    pub reason: String,
}

impl RateLimitDecision {
    pub fn allow(remaining: u64, retry_after_secs: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_secs,
            reason: "ok".to_string(),
        }
    }

    /// Rejections always report zero remaining budget.
    pub fn reject(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_secs,
            reason: "rate limit exceeded".to_string(),
        }
    }

    /// Allow with unlimited budget. Used both for unconfigured rules and
    /// for the fail-open path, distinguished by `reason`.
    pub fn unlimited(reason: &str) -> Self {
        Self {
            allowed: true,
            remaining: u64::MAX,
            retry_after_secs: 0,
            reason: reason.to_string(),
        }
    }
}
