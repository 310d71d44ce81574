//! In-process L1 driver backed by `DashMap`.
//!
//! A concurrent map plus a capacity-bounded eviction policy. Expiry here is
//! lazy, checked on access, rather than wheel-scheduled: staleness windows
//! as short as tens of milliseconds are common, and a second-granularity
//! sweep would miss them. Correctness never depends on retention beyond
//! `gc_at`.

use async_trait::async_trait;
use cachekit_core::{CacheEntry, CacheError, L1Driver, Result};
use dashmap::DashMap;

/// Configuration for [`MemoryDriver`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Maximum number of entries; `0` means unlimited.
    pub max_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_capacity: 0 }
    }
}

/// Concurrent in-memory L1 driver. Cloning shares the same underlying
/// store (cheap `Arc` handles throughout `DashMap`).
#[derive(Clone, Default)]
pub struct MemoryDriver {
    data: std::sync::Arc<DashMap<String, CacheEntry<Vec<u8>>>>,
    config: MemoryConfig,
}

impl MemoryDriver {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            data: std::sync::Arc::new(DashMap::new()),
            config,
        }
    }

    fn maybe_evict(&self) {
        if self.config.max_capacity == 0 || self.data.len() < self.config.max_capacity {
            return;
        }
        if let Some(victim) = self.data.iter().next().map(|e| e.key().clone()) {
            self.data.remove(&victim);
        }
    }
}

#[async_trait]
impl L1Driver for MemoryDriver {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        match self.data.get(key) {
            Some(entry) if entry.is_gcd() => {
                drop(entry);
                self.data.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry<Vec<u8>>) -> Result<()> {
        self.maybe_evict();
        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

impl MemoryDriver {
    pub async fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }
}

/// A [`L1Driver`]-compatible wrapper that can be told to fail every call, to
/// exercise the coordinator's circuit-breaker integration in tests.
#[derive(Clone, Default)]
pub struct FailingDriver {
    inner: MemoryDriver,
    failing: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl FailingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(CacheError::Backend("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl L1Driver for FailingDriver {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry<Vec<u8>>) -> Result<()> {
        self.check()?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.clear().await
    }
}

#[async_trait]
impl cachekit_core::L2Driver for FailingDriver {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get() {
        let driver = MemoryDriver::default();
        let entry = CacheEntry::new(b"v".to_vec(), Duration::from_secs(60), Duration::from_secs(60), vec![]);
        driver.set("k", entry).await.unwrap();
        let got = driver.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, b"v".to_vec());
    }

    #[tokio::test]
    async fn gcd_entries_are_absent() {
        let driver = MemoryDriver::default();
        let entry = CacheEntry::new(b"v".to_vec(), Duration::from_millis(0), Duration::from_millis(0), vec![]);
        driver.set("k", entry).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(driver.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let driver = MemoryDriver::default();
        assert!(!driver.delete("missing").await.unwrap());
        let entry = CacheEntry::new(b"v".to_vec(), Duration::from_secs(1), Duration::from_secs(1), vec![]);
        driver.set("k", entry).await.unwrap();
        assert!(driver.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn failing_driver_errors_until_toggled_off() {
        let driver = FailingDriver::new();
        driver.set_failing(true);
        assert!(driver.get("k").await.is_err());
        driver.set_failing(false);
        assert!(driver.get("k").await.unwrap().is_none());
    }
}
