use crate::error::{RateLimitError, Result};
use envconfig::Envconfig;
use std::time::Duration;

/// Engine configuration, loaded from environment variables with defaults
/// suitable for local development.
#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Redis connection URL
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix for every key the engine writes to the store
    #[envconfig(from = "RATEGATE_KEY_PREFIX", default = "rategate")]
    pub key_prefix: String,

    /// Upper bound on a single store round trip, in milliseconds
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "500")]
    pub store_timeout_ms: u64,

    /// Stats entries idle longer than this are removed by the sweeper
    #[envconfig(from = "STATS_SWEEP_CUTOFF_SECS", default = "86400")]
    pub stats_cutoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "rategate".to_string(),
            store_timeout_ms: 500,
            stats_cutoff_secs: 24 * 60 * 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Config::init_from_env().map_err(|e| RateLimitError::Config(e.to_string()))
    }

    /// Store round trip bound as a duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Stats sweep cutoff as a duration
    pub fn stats_cutoff(&self) -> Duration {
        Duration::from_secs(self.stats_cutoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.key_prefix, "rategate");
        assert_eq!(config.store_timeout(), Duration::from_millis(500));
        assert_eq!(config.stats_cutoff(), Duration::from_secs(86400));
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        std::env::set_var("STORE_TIMEOUT_MS", "fast");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RateLimitError::Config(_)));
        std::env::remove_var("STORE_TIMEOUT_MS");
    }
}
