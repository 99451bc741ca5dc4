use super::{
    RateLimitConfig, RateLimitError, RateLimitMetricsSnapshot, RateLimiter,
    metrics::RateLimitMetrics,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::debug;

/// Above this many tracked keys, buckets that have refilled completely are
/// dropped; a full bucket is indistinguishable from a new one.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst()),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill);
        let refill = elapsed.as_secs_f64() * f64::from(config.rate());
        self.tokens = (self.tokens + refill).min(f64::from(config.burst()));
        self.last_refill = now;
    }

    /// Spend one token, or return how long until one is available.
    fn try_acquire(&mut self, config: &RateLimitConfig) -> Result<(), Duration> {
        self.refill(config, Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / f64::from(config.rate())))
        }
    }

    fn is_full(&self, config: &RateLimitConfig, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * f64::from(config.rate()) >= f64::from(config.burst())
    }
}

/// Per-key token buckets held in process memory.
pub struct LocalRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, BucketState>>,
    metrics: RateLimitMetrics,
}

impl std::fmt::Debug for LocalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LocalRateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            metrics: RateLimitMetrics::new("local"),
        }
    }

    fn acquire(&self, key: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock();

        if buckets.len() >= PRUNE_THRESHOLD && !buckets.contains_key(key) {
            let now = Instant::now();
            buckets.retain(|_, bucket| !bucket.is_full(&self.config, now));
            debug!(remaining = buckets.len(), "Pruned idle rate limit buckets");
        }

        buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState::new(&self.config))
            .try_acquire(&self.config)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self, key: &str) -> Result<(), RateLimitError> {
        match self.acquire(key) {
            Ok(()) => {
                self.metrics.record_allowed();
                Ok(())
            }
            Err(retry_after) => {
                self.metrics.record_rejected();
                Err(RateLimitError::Limited { retry_after })
            }
        }
    }

    fn mode(&self) -> &'static str {
        "local"
    }

    fn snapshot(&self) -> RateLimitMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_then_reject_then_refill() {
        let limiter = LocalRateLimiter::new(RateLimitConfig::new(10, 3));

        for _ in 0..3 {
            assert!(limiter.check("user-1").await.is_ok());
        }

        let rejected = limiter.check("user-1").await;
        let Err(RateLimitError::Limited { retry_after }) = &rejected else {
            panic!("expected rate limit rejection, got {rejected:?}");
        };
        assert!(*retry_after <= Duration::from_millis(100));

        // One token refills after 1/rate seconds.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.check("user-1").await.is_ok());
        assert!(limiter.check("user-1").await.is_err());

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.allowed, 4);
        assert_eq!(snapshot.rejected, 2);
        assert_eq!(snapshot.mode, "local");
    }

    #[tokio::test]
    async fn keys_have_independent_buckets() {
        let limiter = LocalRateLimiter::new(RateLimitConfig::new(1, 1));

        assert!(limiter.check("203.0.113.1").await.is_ok());
        assert!(limiter.check("203.0.113.1").await.is_err());
        assert!(limiter.check("203.0.113.2").await.is_ok());
    }

    #[test]
    fn rejection_consumes_nothing() {
        let config = RateLimitConfig::new(1, 1);
        let mut bucket = BucketState::new(&config);

        assert!(bucket.try_acquire(&config).is_ok());
        assert!(bucket.try_acquire(&config).is_err());
        assert!(bucket.tokens >= 0.0);
    }
}
