use crate::error::{RateLimitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rate limiting algorithm selection for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        };
        f.write_str(name)
    }
}

impl FromStr for Algorithm {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            other => Err(RateLimitError::InvalidRule(format!(
                "unknown algorithm {:?}",
                other
            ))),
        }
    }
}

/// A single rate limiting rule: at most `permits` admissions per `window`
/// for each identifier, enforced by `algorithm`.
///
/// Rules live only in the in-process registry; they are not persisted and
/// must be re-registered after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub key: String,
    pub permits: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub algorithm: Algorithm,
    pub description: String,
}

impl RateLimitRule {
    pub fn new(
        key: impl Into<String>,
        permits: u64,
        window: Duration,
        algorithm: Algorithm,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            permits,
            window,
            algorithm,
            description: description.into(),
        }
    }

    /// Validate rule parameters before registration.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(RateLimitError::InvalidRule(
                "rule key must not be empty".to_string(),
            ));
        }
        if self.permits == 0 {
            return Err(RateLimitError::InvalidRule(
                "permits must be greater than 0".to_string(),
            ));
        }
        if self.window < Duration::from_secs(1) {
            return Err(RateLimitError::InvalidRule(
                "window must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Refill/leak rate in units per millisecond.
    pub(crate) fn rate_per_ms(&self) -> f64 {
        self.permits as f64 / self.window.as_millis() as f64
    }
}

/// The illustrative startup rule set. Callers typically replace or extend
/// these at boot.
pub fn default_rules() -> Vec<RateLimitRule> {
    vec![
        RateLimitRule::new(
            "api",
            100,
            Duration::from_secs(60),
            Algorithm::SlidingWindow,
            "general API access",
        ),
        RateLimitRule::new(
            "login",
            5,
            Duration::from_secs(60),
            Algorithm::FixedWindow,
            "login attempts",
        ),
        RateLimitRule::new(
            "register",
            3,
            Duration::from_secs(3600),
            Algorithm::FixedWindow,
            "account registration",
        ),
        RateLimitRule::new(
            "sms",
            1,
            Duration::from_secs(60),
            Algorithm::LeakyBucket,
            "SMS send",
        ),
        RateLimitRule::new(
            "upload",
            10,
            Duration::from_secs(3600),
            Algorithm::TokenBucket,
            "file upload",
        ),
    ]
}
