//! Driver contract: synchronous L1 and asynchronous L2 key-entry stores.
//! Both traits are `async_trait` for a uniform, object-safe interface; an
//! `L1Driver` implementation simply never awaits inside its methods, which
//! is what "synchronous" means operationally here.

use crate::entry::CacheEntry;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// The fast, local, non-suspending tier.
#[async_trait]
pub trait L1Driver: Send + Sync + 'static {
    /// MUST omit gc'd entries.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheEntry<Vec<u8>>>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(entry) = self.get(key).await? {
                out.insert(key.clone(), entry);
            }
        }
        Ok(out)
    }

    /// MUST overwrite any existing entry for `key`.
    async fn set(&self, key: &str, entry: CacheEntry<Vec<u8>>) -> Result<()>;

    /// Returns whether `key` existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()>;
}

/// The slower, shared, suspending tier. MUST raise a `DriverError`/`Backend`
/// error on I/O failure so the circuit breaker can record it; absence of a
/// key MUST NOT raise.
#[async_trait]
pub trait L2Driver: L1Driver {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
