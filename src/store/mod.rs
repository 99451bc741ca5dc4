//! Narrow key-value contract for the volatile store.
//!
//! Sessions, revocation markers and distributed rate-limit counters all go
//! through [`ExpiringStore`]. Redis is the production implementation; the
//! in-process [`MemoryStore`] follows the same expiry rules for tests and
//! single-node development.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode or decode stored value: {0}")]
    Codec(String),
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

/// Key-value operations with store-managed expiry.
///
/// Every key written through this trait carries an expiry; zero expiries are
/// rejected (Redis refuses `PX 0`), so callers must clamp before writing.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Increment the counter under `key` and (re)arm its expiry, returning the
    /// post-increment value. Increment and expiry are applied atomically.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Short label for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Default bound on a single remote store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a database call under `timeout`; expiry becomes [`StoreError::Timeout`].
///
/// # Errors
/// Returns the database error, or the timeout.
pub(crate) async fn bounded_query<T, E, F>(timeout: Duration, query: F) -> Result<T, E>
where
    F: Future<Output = Result<T, sqlx::Error>>,
    E: From<sqlx::Error> + From<StoreError>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => result.map_err(E::from),
        Err(_) => Err(StoreError::Timeout(timeout).into()),
    }
}
