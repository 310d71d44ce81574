//! `CacheMetrics` implementation that logs via `tracing`. Enable with the
//! `tracing` feature.

use crate::{CacheMetrics, CacheOperation, CacheTier};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    service_name: Option<String>,
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str, tier: CacheTier) {
        debug!(
            target: "cachekit",
            event = "hit",
            key = %key,
            tier = ?tier,
            service = ?self.service_name,
            "cache hit"
        );
    }

    fn record_miss(&self, key: &str) {
        debug!(
            target: "cachekit",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "cache miss"
        );
    }

    fn record_stale_hit(&self, key: &str) {
        debug!(
            target: "cachekit",
            event = "stale_hit",
            key = %key,
            service = ?self.service_name,
            "cache stale hit"
        );
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        trace!(
            target: "cachekit",
            event = "latency",
            operation = ?operation,
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "cache operation latency"
        );
    }

    fn record_circuit_open(&self) {
        warn!(
            target: "cachekit",
            event = "circuit_open",
            service = ?self.service_name,
            "circuit breaker opened"
        );
    }
}
