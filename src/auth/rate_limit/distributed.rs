use super::{
    RateLimitConfig, RateLimitError, RateLimitMetricsSnapshot, RateLimiter,
    metrics::RateLimitMetrics,
};
use crate::store::ExpiringStore;
use async_trait::async_trait;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::error;

/// Fixed-window counters in the shared volatile store, so every instance
/// enforces the same budget.
pub struct DistributedRateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn ExpiringStore>,
    metrics: RateLimitMetrics,
}

impl std::fmt::Debug for DistributedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedRateLimiter")
            .field("config", &self.config)
            .field("store", &self.store.kind())
            .finish_non_exhaustive()
    }
}

impl DistributedRateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn ExpiringStore>) -> Self {
        Self {
            config,
            store,
            metrics: RateLimitMetrics::new("distributed"),
        }
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.config.window().as_millis()).unwrap_or(u64::MAX)
    }
}

/// `(window index, millis left in the window)` for `now_millis`.
fn window_position(now_millis: u64, window_millis: u64) -> (u64, u64) {
    let window_millis = window_millis.max(1);
    (
        now_millis / window_millis,
        window_millis - now_millis % window_millis,
    )
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let (index, remaining) = window_position(now, self.window_millis());
        let counter = format!("ratelimit:{key}:{index}");

        let count = match self
            .store
            .incr_with_expiry(&counter, self.config.window())
            .await
        {
            Ok(count) => count,
            Err(err) => {
                error!("Rate limit counter unavailable, rejecting request: {err}");
                self.metrics.record_rejected();
                return Err(err.into());
            }
        };

        if count > self.config.window_limit() {
            self.metrics.record_rejected();
            return Err(RateLimitError::Limited {
                retry_after: Duration::from_millis(remaining),
            });
        }

        self.metrics.record_allowed();
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "distributed"
    }

    fn snapshot(&self) -> RateLimitMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};

    #[test]
    fn window_position_reports_time_left() {
        assert_eq!(window_position(125_000, 60_000), (2, 55_000));
        assert_eq!(window_position(120_000, 60_000), (2, 60_000));
    }

    #[tokio::test]
    async fn rejects_past_window_limit() {
        // 1 rps over 2s would be 2, so burst (3) sets the limit.
        let config = RateLimitConfig::new(1, 3).with_window(Duration::from_secs(2));
        let limiter = DistributedRateLimiter::new(config, Arc::new(MemoryStore::new()));

        // Stay clear of a window boundary.
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let (_, remaining) = window_position(now, 2_000);
        if remaining < 500 {
            tokio::time::sleep(Duration::from_millis(remaining + 10)).await;
        }

        for _ in 0..3 {
            assert!(limiter.check("sub-1").await.is_ok());
        }
        let rejected = limiter.check("sub-1").await;
        assert!(matches!(rejected, Err(RateLimitError::Limited { .. })));
        assert!(limiter.check("sub-2").await.is_ok());

        let snapshot = limiter.snapshot();
        assert_eq!((snapshot.allowed, snapshot.rejected), (4, 1));
    }

    struct FailingStore;

    #[async_trait]
    impl ExpiringStore for FailingStore {
        async fn put(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn incr_with_expiry(&self, _: &str, ttl: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Timeout(ttl))
        }

        fn kind(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let limiter =
            DistributedRateLimiter::new(RateLimitConfig::new(10, 20), Arc::new(FailingStore));

        let result = limiter.check("203.0.113.9").await;
        assert!(matches!(result, Err(RateLimitError::Store(_))));
        assert_eq!(limiter.snapshot().rejected, 1);
    }
}
