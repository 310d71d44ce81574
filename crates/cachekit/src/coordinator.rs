//! The cache coordinator: orchestrates L1/L2 drivers, the circuit breaker,
//! the tag index and the bus into `get`/`set`/`delete`/`has`/`clear`/
//! `invalidate_tags`/`pull`/`expire`/`namespace`. `get_or_set`, the
//! stale-while-revalidate orchestrator, lives in [`crate::swr`] and is
//! wired in below.
//!
//! `L1` is always present; `L2` and the bus are optional collaborators
//! behind `Option<Arc<dyn L2Driver>>` / `Option<Arc<CacheBus>>` rather than
//! a single mandatory backend.

use async_trait::async_trait;
use cachekit_bus::{CacheBus, CacheBusSink};
use cachekit_core::{
    CacheEntry, CacheError, CacheKey, CacheMetrics, CacheOperation, CacheTier, CircuitBreaker,
    CircuitBreakerConfig, GetOptions, JsonSerializer, NoopMetrics, Result, Serializer, SetOptions,
    SingleFlight, TagIndex,
};
use cachekit_core::L1Driver;
use cachekit_core::L2Driver;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coordinator-level configuration: defaults applied when a call's options
/// don't specify them.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Prefix every key with `namespace + ":"`, transparently.
    pub namespace: Option<String>,
    pub default_stale_time: Duration,
    /// Defaults to `default_stale_time` when unset.
    pub default_gc_time: Option<Duration>,
    pub circuit: CircuitBreakerConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            default_stale_time: Duration::from_secs(60),
            default_gc_time: None,
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

/// Orchestrates an L1 driver, an optional L2 driver, and an optional bus
/// into a coherent, failure-tolerant cache.
///
/// Generic over:
/// - `L1`: the synchronous in-process driver (mandatory).
/// - `S`: the payload serializer (default `JsonSerializer`).
/// - `M`: the metrics sink (default `NoopMetrics`).
pub struct Coordinator<L1, S = JsonSerializer, M = NoopMetrics>
where
    L1: L1Driver,
    S: Serializer,
    M: CacheMetrics,
{
    pub(crate) l1: Arc<L1>,
    pub(crate) l2: Option<Arc<dyn L2Driver>>,
    pub(crate) bus: Option<Arc<CacheBus>>,
    pub(crate) circuit: Arc<CircuitBreaker>,
    pub(crate) single_flight: Arc<SingleFlight<Vec<u8>, CacheError>>,
    pub(crate) tags: Arc<TagIndex>,
    pub(crate) serializer: Arc<S>,
    pub(crate) metrics: Arc<M>,
    pub(crate) config: CoordinatorConfig,
}

impl<L1, S, M> Clone for Coordinator<L1, S, M>
where
    L1: L1Driver,
    S: Serializer,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            bus: self.bus.clone(),
            circuit: self.circuit.clone(),
            single_flight: self.single_flight.clone(),
            tags: self.tags.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L1: L1Driver> Coordinator<L1, JsonSerializer, NoopMetrics> {
    pub fn new(l1: L1) -> Self {
        Self::with_config(l1, CoordinatorConfig::default())
    }

    pub fn with_config(l1: L1, config: CoordinatorConfig) -> Self {
        Self {
            l1: Arc::new(l1),
            l2: None,
            bus: None,
            circuit: Arc::new(CircuitBreaker::new(config.circuit)),
            single_flight: Arc::new(SingleFlight::new()),
            tags: Arc::new(TagIndex::new()),
            serializer: Arc::new(JsonSerializer),
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }
}

impl<L1, S, M> Coordinator<L1, S, M>
where
    L1: L1Driver,
    S: Serializer,
    M: CacheMetrics,
{
    pub fn with_serializer_and_metrics(
        l1: L1,
        serializer: S,
        metrics: M,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            l1: Arc::new(l1),
            l2: None,
            bus: None,
            circuit: Arc::new(CircuitBreaker::new(config.circuit)),
            single_flight: Arc::new(SingleFlight::new()),
            tags: Arc::new(TagIndex::new()),
            serializer: Arc::new(serializer),
            metrics: Arc::new(metrics),
            config,
        }
    }

    pub fn with_l2(mut self, l2: Arc<dyn L2Driver>) -> Self {
        self.l2 = Some(l2);
        self
    }

    pub fn with_bus(mut self, bus: Arc<CacheBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// A view over the same coordinator with `prefix` joined ahead of every
    /// key. Shares every backing resource; this is bookkeeping, not a new
    /// cache.
    pub fn namespace(&self, prefix: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.config.namespace = Some(match &self.config.namespace {
            Some(existing) => format!("{existing}:{}", prefix.into()),
            None => prefix.into(),
        });
        clone
    }

    pub(crate) fn full_key<K: CacheKey>(&self, key: &K) -> String {
        let k = key.full_key();
        match &self.config.namespace {
            Some(ns) => format!("{ns}:{k}"),
            None => k,
        }
    }

    fn l2_is_usable(&self) -> bool {
        self.l2.is_some() && !self.circuit.is_open()
    }

    /// Looks up the raw entry: L1 first, L2 on an L1 miss (if present and
    /// the circuit is closed), backfilling L1 on an L2 hit. Never surfaces
    /// an L2 failure as an `Err`; it trips the circuit and is treated like
    /// a miss.
    pub(crate) async fn fetch_entry(&self, full_key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        if let Some(entry) = self.l1.get(full_key).await? {
            return Ok(Some(entry));
        }

        if !self.l2_is_usable() {
            return Ok(None);
        }

        let l2 = self.l2.as_ref().unwrap();
        match l2.get(full_key).await {
            Ok(Some(entry)) => {
                self.circuit.report_success();
                let _ = self.l1.set(full_key, entry.clone()).await;
                Ok(Some(entry))
            }
            Ok(None) => {
                self.circuit.report_success();
                Ok(None)
            }
            Err(e) => {
                if e.trips_circuit() {
                    self.circuit.report_failure();
                    self.metrics.record_circuit_open();
                }
                Ok(None)
            }
        }
    }

    /// Reads and deserializes `key`, checking L1 then L2.
    pub async fn get<T, K>(&self, key: K) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: CacheKey,
    {
        self.get_with_options(key, GetOptions::default()).await
    }

    /// Reads and deserializes `key`, checking L1 then L2. `opts.clone` is a
    /// no-op: values here are always deserialized fresh out of the entry's
    /// stored bytes, never handed out as a shared reference, so there is
    /// nothing left to clone. The parameter exists for API-shape parity
    /// with the two-argument form of the original `get(key, opts?)`.
    pub async fn get_with_options<T, K>(&self, key: K, _opts: GetOptions) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: CacheKey,
    {
        let full_key = self.full_key(&key);
        let start = Instant::now();
        let entry = self.fetch_entry(&full_key).await?;
        let result = match entry {
            Some(e) if e.is_stale() => {
                self.metrics.record_stale_hit(&full_key);
                Some(self.serializer.deserialize(&e.value)?)
            }
            Some(e) => {
                self.metrics.record_hit(&full_key, CacheTier::L1);
                Some(self.serializer.deserialize(&e.value)?)
            }
            None => {
                self.metrics.record_miss(&full_key);
                None
            }
        };
        self.metrics
            .record_latency(CacheOperation::Get, start.elapsed());
        Ok(result)
    }

    /// Writes `value` under `key`, materializing the entry's stale/gc
    /// window and tags, then publishes a best-effort invalidation so peers
    /// drop their own copy.
    pub async fn set<T, K>(&self, key: K, value: T, opts: impl Into<SetOptions>) -> Result<()>
    where
        T: Serialize,
        K: CacheKey,
    {
        let full_key = self.full_key(&key);
        let opts = opts.into();
        let start = Instant::now();
        let serialize_start = Instant::now();
        let bytes = self.serializer.serialize(&value)?;
        self.metrics
            .record_latency(CacheOperation::Serialize, serialize_start.elapsed());

        self.set_raw(&full_key, bytes, opts).await?;
        self.metrics
            .record_latency(CacheOperation::Set, start.elapsed());
        Ok(())
    }

    pub(crate) async fn set_raw(
        &self,
        full_key: &str,
        bytes: Vec<u8>,
        opts: SetOptions,
    ) -> Result<()> {
        let stale_time = opts.stale_time.unwrap_or(self.config.default_stale_time);
        let gc_time = opts
            .gc_time
            .or(self.config.default_gc_time)
            .unwrap_or(stale_time);
        let entry = CacheEntry::new(bytes, stale_time, gc_time, opts.tags.clone());

        self.l1.set(full_key, entry.clone()).await?;

        if self.l2_is_usable() {
            let l2 = self.l2.as_ref().unwrap();
            match l2.set(full_key, entry.clone()).await {
                Ok(()) => self.circuit.report_success(),
                Err(e) => {
                    if e.trips_circuit() {
                        self.circuit.report_failure();
                        self.metrics.record_circuit_open();
                    }
                }
            }
        }

        self.tags.add_tags(full_key, &opts.tags);
        self.publish_invalidate(vec![full_key.to_string()]).await;
        Ok(())
    }

    /// Deletes `keys` from both tiers. Returns the count of keys that
    /// existed in either tier.
    pub async fn delete<K: CacheKey>(&self, keys: impl IntoIterator<Item = K>) -> Result<u64> {
        let start = Instant::now();
        let full_keys: Vec<String> = keys.into_iter().map(|k| self.full_key(&k)).collect();
        let count = self.delete_full_keys(&full_keys).await?;
        self.publish_invalidate(full_keys).await;
        self.metrics
            .record_latency(CacheOperation::Delete, start.elapsed());
        Ok(count)
    }

    async fn delete_full_keys(&self, full_keys: &[String]) -> Result<u64> {
        let mut count = 0u64;
        for key in full_keys {
            let existed_l1 = self.l1.delete(key).await?;
            let mut existed = existed_l1;
            if self.l2_is_usable() {
                let l2 = self.l2.as_ref().unwrap();
                match l2.delete(key).await {
                    Ok(existed_l2) => {
                        self.circuit.report_success();
                        existed = existed || existed_l2;
                    }
                    Err(e) => {
                        if e.trips_circuit() {
                            self.circuit.report_failure();
                        }
                    }
                }
            }
            self.tags.remove_key(key);
            if existed {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether `key` is present in either tier, without deserializing it.
    pub async fn has<K: CacheKey>(&self, key: K) -> Result<bool> {
        let full_key = self.full_key(&key);
        if self.l1.has(&full_key).await? {
            return Ok(true);
        }
        if !self.l2_is_usable() {
            return Ok(false);
        }
        let l2 = self.l2.as_ref().unwrap();
        match l2.has(&full_key).await {
            Ok(present) => {
                self.circuit.report_success();
                Ok(present)
            }
            Err(e) => {
                if e.trips_circuit() {
                    self.circuit.report_failure();
                }
                Ok(false)
            }
        }
    }

    /// Drops every key from both tiers and the tag index, then broadcasts
    /// a clear event to peers.
    pub async fn clear(&self) -> Result<()> {
        self.l1.clear().await?;
        if self.l2_is_usable() {
            let l2 = self.l2.as_ref().unwrap();
            match l2.clear().await {
                Ok(()) => self.circuit.report_success(),
                Err(e) => {
                    if e.trips_circuit() {
                        self.circuit.report_failure();
                    }
                }
            }
        }
        self.tags.clear();
        if let Some(bus) = &self.bus {
            let _ = bus.publish_clear().await;
        }
        Ok(())
    }

    /// Deletes every key currently tagged with any of `tags`.
    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<u64> {
        let start = Instant::now();
        let keys = self.tags.keys_for_tags(tags);
        let count = self.delete_full_keys(&keys).await?;
        if let Some(bus) = &self.bus {
            let _ = bus.publish_invalidate_tags(tags.to_vec()).await;
        }
        self.metrics
            .record_latency(CacheOperation::InvalidateTags, start.elapsed());
        Ok(count)
    }

    /// `get` then `delete`. Not atomic across a suspension point, but no
    /// other writer on this instance can observe the key between the two
    /// calls.
    pub async fn pull<T, K>(&self, key: K) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: CacheKey + Clone,
    {
        let value = self.get(key.clone()).await?;
        self.delete([key]).await?;
        Ok(value)
    }

    /// Rewrites the entry so it reads as stale as of now, leaving `gc_at`
    /// and tags unchanged. Returns whether the key existed.
    pub async fn expire<K: CacheKey>(&self, key: K) -> Result<bool> {
        let full_key = self.full_key(&key);
        match self.l1.get(&full_key).await? {
            Some(mut entry) => {
                entry.mark_stale_now();
                self.l1.set(&full_key, entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Best-effort publish; bus failures never propagate to the caller,
    /// swallowed the same way L2 failures are, just without a circuit.
    pub(crate) async fn publish_invalidate(&self, keys: Vec<String>) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish_invalidate(keys).await;
        }
    }
}

/// Applies bus-originated events to L1 and the tag index only, never to L2
/// (the peer that caused the event already wrote its own L2), and never
/// republishes, so invalidation fan-out stays loop-free.
#[async_trait]
impl<L1, S, M> CacheBusSink for Coordinator<L1, S, M>
where
    L1: L1Driver,
    S: Serializer,
    M: CacheMetrics,
{
    async fn apply_invalidate(&self, keys: Vec<String>) {
        for key in &keys {
            let _ = self.l1.delete(key).await;
            self.tags.remove_key(key);
        }
    }

    async fn apply_invalidate_tags(&self, tags: Vec<String>) {
        let keys = self.tags.keys_for_tags(&tags);
        for key in &keys {
            let _ = self.l1.delete(key).await;
            self.tags.remove_key(key);
        }
    }

    async fn apply_clear(&self) {
        let _ = self.l1.clear().await;
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachekit_drivers::MemoryDriver;

    fn coordinator() -> Coordinator<MemoryDriver> {
        Coordinator::new(MemoryDriver::default())
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let c = coordinator();
        c.set("k", 42i32, SetOptions::default()).await.unwrap();
        let v: Option<i32> = c.get("k").await.unwrap();
        assert_eq!(v, Some(42));
    }

    #[tokio::test]
    async fn get_on_missing_key_is_none() {
        let c = coordinator();
        let v: Option<i32> = c.get("missing").await.unwrap();
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn get_with_options_returns_same_value_as_get() {
        let c = coordinator();
        c.set("k", 9i32, SetOptions::default()).await.unwrap();
        let v: Option<i32> = c
            .get_with_options("k", GetOptions { clone: true })
            .await
            .unwrap();
        assert_eq!(v, Some(9));
    }

    #[tokio::test]
    async fn delete_reports_existence_count() {
        let c = coordinator();
        c.set("k", 1i32, SetOptions::default()).await.unwrap();
        let deleted = c.delete(["k", "missing"]).await.unwrap();
        assert_eq!(deleted, 1);
        let v: Option<i32> = c.get("k").await.unwrap();
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn invalidate_tags_deletes_every_tagged_key() {
        let c = coordinator();
        c.set(
            "a",
            1i32,
            SetOptions {
                tags: vec!["group".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        c.set(
            "b",
            2i32,
            SetOptions {
                tags: vec!["group".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let count = c.invalidate_tags(&["group".to_string()]).await.unwrap();
        assert_eq!(count, 2);
        let a: Option<i32> = c.get("a").await.unwrap();
        assert_eq!(a, None);
    }

    #[tokio::test]
    async fn expire_marks_entry_stale_without_removing_it() {
        let c = coordinator();
        c.set(
            "k",
            1i32,
            SetOptions {
                stale_time: Some(Duration::from_secs(60)),
                gc_time: Some(Duration::from_secs(120)),
                tags: vec![],
            },
        )
        .await
        .unwrap();
        assert!(c.expire("k").await.unwrap());
        let entry = c.fetch_entry(&c.full_key(&"k")).await.unwrap().unwrap();
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn pull_returns_value_and_removes_it() {
        let c = coordinator();
        c.set("k", 7i32, SetOptions::default()).await.unwrap();
        let v: Option<i32> = c.pull("k").await.unwrap();
        assert_eq!(v, Some(7));
        let gone: Option<i32> = c.get("k").await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn namespace_view_prefixes_keys() {
        let c = coordinator();
        let ns = c.namespace("users");
        ns.set("1", "alice", SetOptions::default()).await.unwrap();
        let direct: Option<String> = c.get(cachekit_core::CompositeKey::new().part("users:1")).await.unwrap();
        assert_eq!(direct, Some("alice".to_string()));
    }
}
