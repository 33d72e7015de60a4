//! Atomic store client.
//!
//! The engine coordinates across processes exclusively through a shared
//! key/value store. Every check-and-consume runs as one indivisible
//! server-side operation ([`AtomicOp`]); a separate get-then-set sequence
//! would admit more than `permits` callers under concurrency and is not
//! offered by this interface. The read-only primitives exist for the
//! non-consuming peek paths and never participate in admission decisions.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;

/// The four named read-modify-write operations the executors run against
/// the store. Each carries its Redis Lua payload; the in-memory backend
/// interprets the same semantics natively under a lock.
///
/// Reply conventions (integer tuples):
/// - `FixedWindowAcquire`:  `[allowed, remaining, reset_secs]`
/// - `SlidingWindowAcquire`: `[allowed, remaining]`
/// - `TokenBucketAcquire`:  `[allowed, remaining, wait_ms]`
/// - `LeakyBucketAcquire`:  `[allowed, remaining, wait_ms]`
///
/// where `allowed` is 1 or 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    /// KEYS[1] window-scoped counter key; ARGV: permits, window_secs.
    FixedWindowAcquire,
    /// KEYS[1] sorted-set key; ARGV: permits, window_ms, now_ms, member.
    SlidingWindowAcquire,
    /// KEYS[1] hash key; ARGV: capacity, rate_per_ms, now_ms, ttl_ms.
    TokenBucketAcquire,
    /// KEYS[1] hash key; ARGV: capacity, rate_per_ms, now_ms, ttl_ms.
    LeakyBucketAcquire,
}

pub const OP_ALLOWED: i64 = 1;

impl AtomicOp {
    /// Redis Lua source for this operation.
    pub fn lua(&self) -> &'static str {
        match self {
            AtomicOp::FixedWindowAcquire => FIXED_WINDOW_LUA,
            AtomicOp::SlidingWindowAcquire => SLIDING_WINDOW_LUA,
            AtomicOp::TokenBucketAcquire => TOKEN_BUCKET_LUA,
            AtomicOp::LeakyBucketAcquire => LEAKY_BUCKET_LUA,
        }
    }
}

const FIXED_WINDOW_LUA: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    ttl = tonumber(ARGV[2])
end
local permits = tonumber(ARGV[1])
if count <= permits then
    return {1, permits - count, ttl}
end
return {0, 0, ttl}
"#;

const SLIDING_WINDOW_LUA: &str = r#"
local permits = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now_ms - window_ms)
local count = redis.call('ZCARD', KEYS[1])
if count < permits then
    redis.call('ZADD', KEYS[1], now_ms, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window_ms)
    return {1, permits - count - 1}
end
redis.call('PEXPIRE', KEYS[1], window_ms)
return {0, 0}
"#;

const TOKEN_BUCKET_LUA: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])
if tokens == nil then
    tokens = capacity
    last_refill = now_ms
end
local elapsed = math.max(0, now_ms - last_refill)
tokens = math.min(capacity, tokens + elapsed * rate)
local allowed = 0
local wait_ms = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
else
    wait_ms = math.ceil((1 - tokens) / rate)
end
redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_refill', now_ms)
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[4]))
return {allowed, math.floor(tokens), wait_ms}
"#;

const LEAKY_BUCKET_LUA: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'volume', 'last_leak')
local volume = tonumber(state[1])
local last_leak = tonumber(state[2])
if volume == nil then
    volume = 0
    last_leak = now_ms
end
local elapsed = math.max(0, now_ms - last_leak)
volume = math.max(0, volume - elapsed * rate)
local allowed = 0
local wait_ms = 0
if volume < capacity then
    volume = volume + 1
    allowed = 1
else
    wait_ms = math.ceil((volume - capacity + 1) / rate)
end
redis.call('HSET', KEYS[1], 'volume', volume, 'last_leak', now_ms)
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[4]))
return {allowed, math.floor(capacity - volume), wait_ms}
"#;

/// Client interface to the shared store.
///
/// `run` is the only write path the engine uses; the scalar, hash and
/// sorted-set reads serve the peek/status surface. Implementations must
/// guarantee that `run` executes its whole read-modify-write sequence
/// indivisibly with respect to concurrent `run` calls on the same key.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Execute one named atomic operation. Returns the operation's
    /// integer reply tuple.
    async fn run(&self, op: AtomicOp, keys: &[&str], args: &[String]) -> Result<Vec<i64>>;

    /// Scalar GET.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remaining TTL in seconds; -2 if the key does not exist, -1 if it
    /// has no expiry (Redis sentinel convention).
    async fn ttl_secs(&self, key: &str) -> Result<i64>;

    /// Multi-field hash read.
    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;

    /// Remove sorted-set members with score <= `max_score`; returns the
    /// number removed.
    async fn zset_prune(&self, key: &str, max_score: u64) -> Result<u64>;

    /// Sorted-set cardinality.
    async fn zset_len(&self, key: &str) -> Result<u64>;

    /// Liveness check against the store.
    async fn ping(&self) -> Result<()>;
}
