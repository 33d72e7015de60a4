//! In-memory implementation of the atomic store client.
//!
//! State lives behind a single mutex, so every [`AtomicOp`] is trivially
//! indivisible. Useful for tests and for running the engine in a single
//! process without an external store; it provides no cross-process
//! coordination.
//!
//! TTL is emulated with an absolute expiry per entry. Operations that
//! carry a caller timestamp (`now_ms` in ARGV) judge expiry against that
//! timestamp, mirroring the Redis scripts which never consult the server
//! clock; the read-only primitives use wall time.

use super::{AtomicOp, AtomicStore};
use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: Value,
    expires_at_ms: Option<u64>,
}

enum Value {
    Counter(i64),
    Hash(HashMap<String, f64>),
    /// (score, member) pairs, unsorted; pruned by score on access.
    Zset(Vec<(u64, String)>),
}

fn wall_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn arg<'a>(args: &'a [String], index: usize, op: AtomicOp) -> Result<&'a str> {
    args.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| RateLimitError::Internal(format!("{:?}: missing argument {}", op, index)))
}

fn int_arg(args: &[String], index: usize, op: AtomicOp) -> Result<i64> {
    arg(args, index, op)?
        .parse::<i64>()
        .map_err(|_| RateLimitError::Internal(format!("{:?}: argument {} not an integer", op, index)))
}

fn float_arg(args: &[String], index: usize, op: AtomicOp) -> Result<f64> {
    arg(args, index, op)?
        .parse::<f64>()
        .map_err(|_| RateLimitError::Internal(format!("{:?}: argument {} not a number", op, index)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.inner
            .lock()
            .map_err(|_| RateLimitError::Internal("store mutex poisoned".to_string()))
    }

    fn one_key<'a>(keys: &[&'a str], op: AtomicOp) -> Result<&'a str> {
        keys.first()
            .copied()
            .ok_or_else(|| RateLimitError::Internal(format!("{:?}: missing key", op)))
    }

    fn fixed_window(
        map: &mut HashMap<String, Entry>,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>> {
        let op = AtomicOp::FixedWindowAcquire;
        let permits = int_arg(args, 0, op)?;
        let window_secs = int_arg(args, 1, op)? as u64;
        let now = wall_now_ms();

        evict_if_expired(map, key, now);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Counter(0),
            expires_at_ms: Some(now + window_secs * 1000),
        });
        let count = match &mut entry.value {
            Value::Counter(count) => {
                *count += 1;
                *count
            }
            _ => return Err(wrong_type(key)),
        };
        let ttl = remaining_secs(entry.expires_at_ms, now).unwrap_or(window_secs as i64);
        if count <= permits {
            Ok(vec![1, permits - count, ttl])
        } else {
            Ok(vec![0, 0, ttl])
        }
    }

    fn sliding_window(
        map: &mut HashMap<String, Entry>,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>> {
        let op = AtomicOp::SlidingWindowAcquire;
        let permits = int_arg(args, 0, op)? as u64;
        let window_ms = int_arg(args, 1, op)? as u64;
        let now_ms = int_arg(args, 2, op)? as u64;
        let member = arg(args, 3, op)?.to_string();

        evict_if_expired(map, key, now_ms);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Zset(Vec::new()),
            expires_at_ms: None,
        });
        let members = match &mut entry.value {
            Value::Zset(members) => members,
            _ => return Err(wrong_type(key)),
        };
        let horizon = now_ms.saturating_sub(window_ms);
        members.retain(|(score, _)| *score > horizon);
        let count = members.len() as u64;
        entry.expires_at_ms = Some(now_ms + window_ms);
        if count < permits {
            members.push((now_ms, member));
            Ok(vec![1, (permits - count - 1) as i64])
        } else {
            Ok(vec![0, 0])
        }
    }

    fn token_bucket(
        map: &mut HashMap<String, Entry>,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>> {
        let op = AtomicOp::TokenBucketAcquire;
        let capacity = float_arg(args, 0, op)?;
        let rate = float_arg(args, 1, op)?;
        let now_ms = float_arg(args, 2, op)?;
        let ttl_ms = int_arg(args, 3, op)? as u64;

        evict_if_expired(map, key, now_ms as u64);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at_ms: None,
        });
        let hash = match &mut entry.value {
            Value::Hash(hash) => hash,
            _ => return Err(wrong_type(key)),
        };
        let mut tokens = hash.get("tokens").copied().unwrap_or(capacity);
        let last_refill = hash.get("last_refill").copied().unwrap_or(now_ms);
        let elapsed = (now_ms - last_refill).max(0.0);
        tokens = (tokens + elapsed * rate).min(capacity);

        let (allowed, wait_ms) = if tokens >= 1.0 {
            tokens -= 1.0;
            (1, 0)
        } else {
            (0, ((1.0 - tokens) / rate).ceil() as i64)
        };
        hash.insert("tokens".to_string(), tokens);
        hash.insert("last_refill".to_string(), now_ms);
        entry.expires_at_ms = Some(now_ms as u64 + ttl_ms);
        Ok(vec![allowed, tokens.floor() as i64, wait_ms])
    }

    fn leaky_bucket(
        map: &mut HashMap<String, Entry>,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>> {
        let op = AtomicOp::LeakyBucketAcquire;
        let capacity = float_arg(args, 0, op)?;
        let rate = float_arg(args, 1, op)?;
        let now_ms = float_arg(args, 2, op)?;
        let ttl_ms = int_arg(args, 3, op)? as u64;

        evict_if_expired(map, key, now_ms as u64);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at_ms: None,
        });
        let hash = match &mut entry.value {
            Value::Hash(hash) => hash,
            _ => return Err(wrong_type(key)),
        };
        let mut volume = hash.get("volume").copied().unwrap_or(0.0);
        let last_leak = hash.get("last_leak").copied().unwrap_or(now_ms);
        let elapsed = (now_ms - last_leak).max(0.0);
        volume = (volume - elapsed * rate).max(0.0);

        let (allowed, wait_ms) = if volume < capacity {
            volume += 1.0;
            (1, 0)
        } else {
            (0, ((volume - capacity + 1.0) / rate).ceil() as i64)
        };
        hash.insert("volume".to_string(), volume);
        hash.insert("last_leak".to_string(), now_ms);
        entry.expires_at_ms = Some(now_ms as u64 + ttl_ms);
        Ok(vec![allowed, (capacity - volume).floor() as i64, wait_ms])
    }
}

fn wrong_type(key: &str) -> RateLimitError {
    RateLimitError::Store(format!(
        "WRONGTYPE operation against key {:?} holding another kind of value",
        key
    ))
}

fn evict_if_expired(map: &mut HashMap<String, Entry>, key: &str, now_ms: u64) {
    if let Some(entry) = map.get(key) {
        if matches!(entry.expires_at_ms, Some(expiry) if expiry <= now_ms) {
            map.remove(key);
        }
    }
}

fn remaining_secs(expires_at_ms: Option<u64>, now_ms: u64) -> Option<i64> {
    expires_at_ms.map(|expiry| (expiry.saturating_sub(now_ms) as i64 + 999) / 1000)
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn run(&self, op: AtomicOp, keys: &[&str], args: &[String]) -> Result<Vec<i64>> {
        let key = Self::one_key(keys, op)?;
        let mut map = self.lock()?;
        match op {
            AtomicOp::FixedWindowAcquire => Self::fixed_window(&mut map, key, args),
            AtomicOp::SlidingWindowAcquire => Self::sliding_window(&mut map, key, args),
            AtomicOp::TokenBucketAcquire => Self::token_bucket(&mut map, key, args),
            AtomicOp::LeakyBucketAcquire => Self::leaky_bucket(&mut map, key, args),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.lock()?;
        evict_if_expired(&mut map, key, wall_now_ms());
        match map.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Counter(count) => Ok(Some(count.to_string())),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn ttl_secs(&self, key: &str) -> Result<i64> {
        let now = wall_now_ms();
        let mut map = self.lock()?;
        evict_if_expired(&mut map, key, now);
        match map.get(key) {
            None => Ok(-2),
            Some(entry) => Ok(remaining_secs(entry.expires_at_ms, now).unwrap_or(-1)),
        }
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut map = self.lock()?;
        evict_if_expired(&mut map, key, wall_now_ms());
        match map.get(key) {
            None => Ok(fields.iter().map(|_| None).collect()),
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(fields
                    .iter()
                    .map(|field| hash.get(*field).map(|v| v.to_string()))
                    .collect()),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn zset_prune(&self, key: &str, max_score: u64) -> Result<u64> {
        let mut map = self.lock()?;
        evict_if_expired(&mut map, key, wall_now_ms());
        match map.get_mut(key) {
            None => Ok(0),
            Some(entry) => match &mut entry.value {
                Value::Zset(members) => {
                    let before = members.len();
                    members.retain(|(score, _)| *score > max_score);
                    Ok((before - members.len()) as u64)
                }
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn zset_len(&self, key: &str) -> Result<u64> {
        let mut map = self.lock()?;
        evict_if_expired(&mut map, key, wall_now_ms());
        match map.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Zset(members) => Ok(members.len() as u64),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
