use opentelemetry::{KeyValue, global, metrics::Counter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Allowed/rejected totals, exported as OpenTelemetry counters and kept as
/// in-process atomics for `/health`.
pub(super) struct RateLimitMetrics {
    mode: &'static str,
    allowed: AtomicU64,
    rejected: AtomicU64,
    allowed_total: Counter<u64>,
    rejected_total: Counter<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateLimitMetricsSnapshot {
    pub mode: String,
    pub allowed: u64,
    pub rejected: u64,
}

impl RateLimitMetrics {
    pub(super) fn new(mode: &'static str) -> Self {
        let meter = global::meter(env!("CARGO_PKG_NAME"));
        Self {
            mode,
            allowed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            allowed_total: meter
                .u64_counter("rate_limit.allowed")
                .with_description("Requests admitted by the rate limiter")
                .build(),
            rejected_total: meter
                .u64_counter("rate_limit.rejected")
                .with_description("Requests rejected by the rate limiter")
                .build(),
        }
    }

    pub(super) fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.allowed_total
            .add(1, &[KeyValue::new("mode", self.mode)]);
    }

    pub(super) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.rejected_total
            .add(1, &[KeyValue::new("mode", self.mode)]);
    }

    pub(super) fn snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            mode: self.mode.to_string(),
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
