//! Redis implementation of [`ExpiringStore`].

use super::{ExpiringStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use std::{future::Future, time::Duration};
use tracing::{Instrument, info_span};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a managed connection and confirm the server answers `PING`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid, the connection fails, or the
    /// server does not answer within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url).context("invalid redis url")?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .context("redis connection timed out")?
            .context("failed to connect to redis")?;

        let store = Self { conn, timeout };
        store.ping().await.context("redis ping failed")?;

        Ok(store)
    }

    /// # Errors
    /// Returns an error if Redis does not answer `PONG`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .run("PING", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Rejected(format!("unexpected PING reply: {pong}")))
        }
    }

    // Bound every command by the configured timeout; dropping the future aborts
    // the in-flight call.
    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let span = info_span!("cache.command", cache.system = "redis", cache.operation = operation);
        match tokio::time::timeout(self.timeout, fut.instrument(span)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_redis_error(&err)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn map_redis_error(err: &redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else if err.kind() == redis::ErrorKind::TypeError {
        StoreError::Codec(err.to_string())
    } else {
        StoreError::Rejected(err.to_string())
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(millis(ttl));
        self.run("SET", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("GET", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _removed: i64 = self
            .run("DEL", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: i64 = self
            .run("EXISTS", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(count > 0)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore();
        let (count,): (u64,) = self
            .run("INCR", async move { pipe.query_async(&mut conn).await })
            .await?;
        Ok(count)
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
