//! Distributed, multi-algorithm rate limiting engine.
//!
//! Many service instances share admission decisions through an external
//! atomic store: every check is one indivisible read-modify-write against
//! the store, so no local locking is needed for cross-process
//! correctness. Four algorithms with distinct burst profiles are
//! available per rule (fixed window, sliding window, token bucket, leaky
//! bucket), and store failures resolve fail-open, since this is a protective
//! control, not a correctness-critical one.
//!
//! ```no_run
//! use rategate::{MemoryStore, RateLimiter};
//! use std::sync::Arc;
//!
//! # async fn example() -> rategate::Result<()> {
//! let limiter = RateLimiter::with_default_rules(Arc::new(MemoryStore::new()), "rategate");
//! let decision = limiter.check_limit("login", "ip:1.2.3.4").await?;
//! if decision.allowed {
//!     // proceed with the protected operation
//! }
//! # Ok(())
//! # }
//! ```

pub mod algorithms;
pub mod config;
pub mod decision;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod registry;
pub mod rule;
pub mod stats;
pub mod store;

pub use config::Config;
pub use decision::RateLimitDecision;
pub use error::{RateLimitError, Result};
pub use guard::protect;
pub use limiter::RateLimiter;
pub use registry::RuleRegistry;
pub use rule::{default_rules, Algorithm, RateLimitRule};
pub use stats::{StatsEntry, StatsKey, StatsTracker};
pub use store::{AtomicStore, MemoryStore, RedisStore};
