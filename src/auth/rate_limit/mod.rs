//! Request admission.
//!
//! Runs before any credential or store work. Buckets are keyed by identity:
//! the verified subject when one is known, otherwise the client address.

mod distributed;
mod local;
mod metrics;

pub use distributed::DistributedRateLimiter;
pub use local::LocalRateLimiter;
pub use metrics::RateLimitMetricsSnapshot;

use crate::store::StoreError;
use async_trait::async_trait;
use std::{str::FromStr, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitMode {
    /// In-process token buckets.
    Local,
    /// Fixed-window counters shared through the volatile store.
    Distributed,
}

impl RateLimitMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Distributed => "distributed",
        }
    }
}

impl FromStr for RateLimitMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "distributed" => Ok(Self::Distributed),
            _ => Err(format!("invalid rate limit mode: {value}")),
        }
    }
}

/// Token-bucket parameters: refill `rate` tokens per second up to `burst`.
/// Distributed mode turns them into a per-window limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    rate: u32,
    burst: u32,
    window: Duration,
}

impl RateLimitConfig {
    /// Zero values are raised to the smallest usable setting.
    #[must_use]
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate: rate.max(1),
            burst: burst.max(1),
            window: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per fixed window: `ceil(rate * window)`, never below
    /// `burst`.
    #[must_use]
    pub fn window_limit(&self) -> u64 {
        let per_window = (f64::from(self.rate) * self.window.as_secs_f64()).ceil();
        // Saturating float-to-int conversion.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let per_window = per_window as u64;
        per_window.max(u64::from(self.burst))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limited, retry after {retry_after:?}")]
    Limited { retry_after: Duration },
    #[error("rate limit store failure: {0}")]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Admit or reject one request for `key`. A rejection consumes nothing.
    ///
    /// # Errors
    /// `Limited` when over budget; `Store` when the shared counter could not be
    /// read, which callers must treat as a rejection.
    async fn check(&self, key: &str) -> Result<(), RateLimitError>;

    fn mode(&self) -> &'static str;

    fn snapshot(&self) -> RateLimitMetricsSnapshot;
}

/// Admits everything; used when rate limiting is disabled.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(&self, _key: &str) -> Result<(), RateLimitError> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "disabled"
    }

    fn snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            mode: self.mode().to_string(),
            ..RateLimitMetricsSnapshot::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(
            "local".parse::<RateLimitMode>(),
            Ok(RateLimitMode::Local)
        );
        assert_eq!(
            "Distributed".parse::<RateLimitMode>(),
            Ok(RateLimitMode::Distributed)
        );
        assert!("global".parse::<RateLimitMode>().is_err());
    }

    #[test]
    fn window_limit_is_at_least_burst() {
        let config = RateLimitConfig::new(10, 20).with_window(Duration::from_secs(60));
        assert_eq!(config.window_limit(), 600);

        let config = RateLimitConfig::new(1, 20).with_window(Duration::from_secs(5));
        assert_eq!(config.window_limit(), 20);
    }

    #[test]
    fn zero_settings_are_raised() {
        let config = RateLimitConfig::new(0, 0).with_window(Duration::ZERO);
        assert_eq!(config.rate(), 1);
        assert_eq!(config.burst(), 1);
        assert_eq!(config.window(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert!(limiter.check("203.0.113.7").await.is_ok());
        }
        assert_eq!(limiter.snapshot().mode, "disabled");
    }
}
