//! Cache entry: an immutable value plus staleness/GC timestamps and tags.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// A stored value with its lifecycle timestamps.
///
/// `created_at <= stale_at <= gc_at`. Fresh while `now < stale_at`, stale
/// while `stale_at <= now < gc_at`, gc'd once `now >= gc_at`; once gc'd it
/// MUST be treated as absent by every caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: SystemTime,
    pub stale_at: SystemTime,
    pub gc_at: SystemTime,
    pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    /// Build an entry with explicit stale/gc windows measured from now.
    ///
    /// `gc_time` is clamped to be at least `stale_time` (spec invariant:
    /// `stale_at <= gc_at`).
    pub fn new(value: T, stale_time: Duration, gc_time: Duration, tags: Vec<String>) -> Self {
        let gc_time = gc_time.max(stale_time);
        let created_at = SystemTime::now();
        Self {
            value,
            created_at,
            stale_at: created_at + stale_time,
            gc_at: created_at + gc_time,
            tags,
        }
    }

    pub fn is_fresh(&self) -> bool {
        SystemTime::now() < self.stale_at
    }

    pub fn is_stale(&self) -> bool {
        let now = SystemTime::now();
        self.stale_at <= now && now < self.gc_at
    }

    pub fn is_gcd(&self) -> bool {
        SystemTime::now() >= self.gc_at
    }

    /// Rewrite this entry so it is stale as of now, keeping `gc_at` and tags
    /// unchanged. Used by `Coordinator::expire`.
    pub fn mark_stale_now(&mut self) {
        self.stale_at = SystemTime::now().min(self.stale_at);
    }

    /// Map the value, preserving every timestamp and tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            created_at: self.created_at,
            stale_at: self.stale_at,
            gc_at: self.gc_at,
            tags: self.tags,
        }
    }

    /// Fraction of the fresh window elapsed, in `[0, 1]` (saturating). Used
    /// to evaluate `eager_refresh` thresholds.
    pub fn elapsed_fraction(&self) -> f64 {
        let total = self
            .stale_at
            .duration_since(self.created_at)
            .unwrap_or_default()
            .as_secs_f64();
        if total <= 0.0 {
            return 1.0;
        }
        let elapsed = SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
            .as_secs_f64();
        (elapsed / total).clamp(0.0, 1.0)
    }
}
