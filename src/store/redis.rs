//! Redis-backed implementation of the atomic store client.
//!
//! Each [`AtomicOp`] runs as a Lua script, so the whole read-modify-write
//! sequence executes server-side without interleaving. Every round trip is
//! bounded by the configured timeout; a slow store turns into a
//! [`RateLimitError::Timeout`] instead of a stalled check.

use super::{AtomicOp, AtomicStore};
use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::future::Future;
use std::time::Duration;

pub struct RedisStore {
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and hold a multiplexed connection shared by all
    /// subsequent operations.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| RateLimitError::Store(format!("invalid redis url: {}", e)))?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            connection,
            timeout,
        })
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RateLimitError::Timeout(self.timeout))?
            .map_err(RateLimitError::from)
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn run(&self, op: AtomicOp, keys: &[&str], args: &[String]) -> Result<Vec<i64>> {
        let script = redis::Script::new(op.lua());
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let mut conn = self.connection.clone();
        let reply: Vec<i64> = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(reply)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = self
            .bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn ttl_secs(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        let ttl: i64 = self
            .bounded(redis::cmd("TTL").arg(key).query_async(&mut conn))
            .await?;
        Ok(ttl)
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        let values: Vec<Option<String>> = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(values)
    }

    async fn zset_prune(&self, key: &str, max_score: u64) -> Result<u64> {
        let mut conn = self.connection.clone();
        let removed: u64 = self
            .bounded(
                redis::cmd("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg("-inf")
                    .arg(max_score)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(removed)
    }

    async fn zset_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = self
            .bounded(redis::cmd("ZCARD").arg(key).query_async(&mut conn))
            .await?;
        Ok(len)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
