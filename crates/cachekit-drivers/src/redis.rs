//! Shared, remote L2 driver backed by Redis.
//!
//! A `bb8` connection pool over `redis::AsyncCommands`, entries
//! round-tripped through JSON, tag membership tracked in Redis sets.
//! Expiry is enforced both ways: `PEXPIREAT` keyed off `gc_at` lets Redis
//! reclaim the key on its own, and `get` still treats a decoded-but-`is_gcd()`
//! entry as absent in case the clocks raced.

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use cachekit_core::{CacheEntry, CacheError, L1Driver, L2Driver, Result};
use redis::{AsyncCommands, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for [`RedisDriver`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., `redis://127.0.0.1:6379`).
    pub url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Timeout for acquiring a connection from the pool.
    pub connection_timeout: Duration,
    /// Prefix applied to every key and tag-set name.
    pub key_prefix: Option<String>,
    /// Pub/sub channel used for cross-instance invalidation broadcast.
    pub invalidation_channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            key_prefix: Some("cachekit".to_string()),
            invalidation_channel: "cachekit:invalidate".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// On-wire representation of a [`CacheEntry`]; `SystemTime` serializes fine
/// via serde but we go through millis-since-epoch so the JSON is stable
/// across platforms and easy to eyeball with `redis-cli GET`.
#[derive(serde::Serialize, serde::Deserialize)]
struct WireEntry {
    value: Vec<u8>,
    created_at_ms: u64,
    stale_at_ms: u64,
    gc_at_ms: u64,
    tags: Vec<String>,
}

fn to_ms(t: std::time::SystemTime) -> u64 {
    t.duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn from_ms(ms: u64) -> std::time::SystemTime {
    std::time::UNIX_EPOCH + Duration::from_millis(ms)
}

impl From<CacheEntry<Vec<u8>>> for WireEntry {
    fn from(e: CacheEntry<Vec<u8>>) -> Self {
        Self {
            value: e.value,
            created_at_ms: to_ms(e.created_at),
            stale_at_ms: to_ms(e.stale_at),
            gc_at_ms: to_ms(e.gc_at),
            tags: e.tags,
        }
    }
}

impl From<WireEntry> for CacheEntry<Vec<u8>> {
    fn from(w: WireEntry) -> Self {
        Self {
            value: w.value,
            created_at: from_ms(w.created_at_ms),
            stale_at: from_ms(w.stale_at_ms),
            gc_at: from_ms(w.gc_at_ms),
            tags: w.tags,
        }
    }
}

/// Redis-backed L2 driver.
#[derive(Clone)]
pub struct RedisDriver {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
}

impl RedisDriver {
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::Driver(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::Driver(e.to_string()))?;
        Ok(Self { pool, config })
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:__tags__:{tag}"),
            None => format!("__tags__:{tag}"),
        }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Driver(e.to_string()))
    }
}

#[async_trait]
impl L1Driver for RedisDriver {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
        let mut conn = self.connection().await?;
        let prefixed = self.prefixed_key(key);
        let bytes: Option<Vec<u8>> = conn
            .get(&prefixed)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        match bytes {
            Some(data) => {
                let wire: WireEntry = serde_json::from_slice(&data)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                let entry: CacheEntry<Vec<u8>> = wire.into();
                if entry.is_gcd() {
                    Ok(None)
                } else {
                    Ok(Some(entry))
                }
            }
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheEntry<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection().await?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let raw: Vec<Option<Vec<u8>>> = conn
            .mget(&prefixed)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let mut out = HashMap::new();
        for (key, data) in keys.iter().zip(raw) {
            if let Some(data) = data {
                let wire: WireEntry = serde_json::from_slice(&data)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                let entry: CacheEntry<Vec<u8>> = wire.into();
                if !entry.is_gcd() {
                    out.insert(key.clone(), entry);
                }
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, entry: CacheEntry<Vec<u8>>) -> Result<()> {
        let mut conn = self.connection().await?;
        let gc_at_ms = to_ms(entry.gc_at);
        let tags = entry.tags.clone();
        let wire: WireEntry = entry.into();
        let serialized =
            serde_json::to_vec(&wire).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let prefixed = self.prefixed_key(key);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(&prefixed, &serialized);
        pipe.pexpire_at(&prefixed, gc_at_ms as i64);
        for tag in &tags {
            pipe.sadd(self.tag_key(tag), key);
        }
        pipe.query_async::<Vec<Value>>(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let prefixed = self.prefixed_key(key);
        let deleted: bool = conn
            .del(&prefixed)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(deleted)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let count: u64 = conn
            .del(&prefixed)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(count)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pattern = match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:*"),
            None => "*".to_string(),
        };
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            if !keys.is_empty() {
                let _: usize = conn
                    .unlink(&keys)
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl L2Driver for RedisDriver {
    async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

impl RedisDriver {
    /// Members of `tag`'s key set, raw (un-prefixed) form.
    pub async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let tag_k = self.tag_key(tag);
        conn.smembers(&tag_k)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    /// Delete every key carrying `tag` along with the tag set itself.
    /// Returns the number of keys deleted.
    pub async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let keys = self.keys_for_tag(tag).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let tag_k = self.tag_key(tag);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &keys {
            pipe.del(self.prefixed_key(key));
        }
        pipe.del(&tag_k);
        pipe.query_async::<Vec<Value>>(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(keys.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_sets_fields() {
        let cfg = RedisConfig::new("redis://example:6379")
            .pool_size(4)
            .prefix("app")
            .connection_timeout(Duration::from_secs(1));
        assert_eq!(cfg.url, "redis://example:6379");
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.key_prefix.as_deref(), Some("app"));
        assert_eq!(cfg.connection_timeout, Duration::from_secs(1));
    }

    #[test]
    fn wire_entry_roundtrip_preserves_timestamps_to_the_millisecond() {
        let entry = CacheEntry::new(
            b"v".to_vec(),
            Duration::from_secs(30),
            Duration::from_secs(60),
            vec!["a".to_string()],
        );
        let stale_at = entry.stale_at;
        let wire: WireEntry = entry.into();
        let json = serde_json::to_vec(&wire).unwrap();
        let back: WireEntry = serde_json::from_slice(&json).unwrap();
        let restored: CacheEntry<Vec<u8>> = back.into();
        assert_eq!(to_ms(restored.stale_at), to_ms(stale_at));
        assert_eq!(restored.tags, vec!["a".to_string()]);
    }
}
