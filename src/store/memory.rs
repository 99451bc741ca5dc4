//! In-process [`ExpiringStore`] with Redis-compatible expiry rules.

use super::{ExpiringStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys; expired entries are purged first.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExpiringStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::Rejected(
                "invalid expire time in 'set' command".to_string(),
            ));
        }
        let expires_at = Instant::now() + ttl;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::Rejected(
                "invalid expire time in 'pexpire' command".to_string(),
            ));
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => entry
                .value
                .parse::<u64>()
                .map_err(|err| StoreError::Codec(err.to_string()))?,
            _ => 0,
        };
        let next = current.saturating_add(1);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(next)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_zero_ttl_like_redis() {
        let store = MemoryStore::new();
        let result = store.put("k", "v", Duration::ZERO).await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryStore::new();
        assert!(store.put("k", "v", Duration::from_millis(20)).await.is_ok());
        assert!(store.exists("k").await.unwrap_or(false));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("k").await.unwrap_or(true));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incr_resets_after_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30);
        assert_eq!(store.incr_with_expiry("c", ttl).await.ok(), Some(1));
        assert_eq!(store.incr_with_expiry("c", ttl).await.ok(), Some(2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr_with_expiry("c", ttl).await.ok(), Some(1));
    }
}
