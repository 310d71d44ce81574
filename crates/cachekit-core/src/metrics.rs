//! Observability hook: always present, `NoopMetrics` by default, so callers
//! can wire in real metrics without threading an `Option` through every
//! operation.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    L1,
    L2,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Get,
    Set,
    Delete,
    Serialize,
    Deserialize,
    InvalidateTags,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::Delete => "delete",
            CacheOperation::Serialize => "serialize",
            CacheOperation::Deserialize => "deserialize",
            CacheOperation::InvalidateTags => "invalidate_tags",
        }
    }
}

/// Observability hook. Implement to integrate with a real metrics backend.
pub trait CacheMetrics: Send + Sync + 'static {
    fn record_hit(&self, key: &str, tier: CacheTier);
    fn record_miss(&self, key: &str);
    fn record_stale_hit(&self, key: &str);
    fn record_latency(&self, operation: CacheOperation, duration: Duration);
    fn record_circuit_open(&self);
}

/// Zero-overhead default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str, _tier: CacheTier) {}
    #[inline]
    fn record_miss(&self, _key: &str) {}
    #[inline]
    fn record_stale_hit(&self, _key: &str) {}
    #[inline]
    fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}
    #[inline]
    fn record_circuit_open(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_and_operation_labels() {
        assert_eq!(CacheTier::L1.as_str(), "l1");
        assert_eq!(CacheOperation::Get.as_str(), "get");
    }

    #[test]
    fn noop_metrics_does_not_panic() {
        let m = NoopMetrics;
        m.record_hit("k", CacheTier::L1);
        m.record_miss("k");
        m.record_stale_hit("k");
        m.record_latency(CacheOperation::Get, Duration::from_millis(1));
        m.record_circuit_open();
    }
}
