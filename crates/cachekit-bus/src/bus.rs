//! Cache bus adapter: publishes mutation events over a [`Transport`] and
//! applies incoming events to a local driver/tag-index pair without
//! re-publishing.
//!
//! Three channels: `cache:invalidate`, `cache:invalidate-tags`,
//! `cache:clear`, each wired to a transport instead of a bare
//! `tokio::sync::broadcast` pair.

use async_trait::async_trait;
use cachekit_core::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::transport::{Handler, Transport};

pub const CHANNEL_INVALIDATE: &str = "cache:invalidate";
pub const CHANNEL_INVALIDATE_TAGS: &str = "cache:invalidate-tags";
pub const CHANNEL_CLEAR: &str = "cache:clear";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateMsg {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateTagsMsg {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClearMsg {}

/// Applies bus-originated invalidation locally. A coordinator implements
/// this and hands `Arc<dyn CacheBusSink>` to [`CacheBus::connect`]; keeping
/// the sink as its own trait avoids a circular crate dependency between
/// `cachekit-bus` and `cachekit`.
#[async_trait]
pub trait CacheBusSink: Send + Sync + 'static {
    async fn apply_invalidate(&self, keys: Vec<String>);
    async fn apply_invalidate_tags(&self, tags: Vec<String>);
    async fn apply_clear(&self);
}

/// Publishes cache mutation events and, once connected, applies events
/// received from peers to a [`CacheBusSink`]. Holds its transport as
/// `Arc<dyn Transport>` so a `Coordinator` can stay generic over drivers
/// only, not over the whole transport middleware stack it's built with.
pub struct CacheBus {
    transport: Arc<dyn Transport>,
}

impl CacheBus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Subscribes to all three channels and starts applying incoming events
    /// to `sink`. Idempotent, loop-free: apply never re-publishes.
    pub async fn connect(&self, sink: Arc<dyn CacheBusSink>) -> Result<()> {
        self.transport.connect().await?;

        let invalidate_sink = sink.clone();
        let invalidate: Handler = Arc::new(move |payload| {
            let sink = invalidate_sink.clone();
            Box::pin(async move {
                if let Ok(msg) = serde_json::from_slice::<InvalidateMsg>(&payload) {
                    sink.apply_invalidate(msg.keys).await;
                }
            })
        });
        self.transport
            .subscribe(CHANNEL_INVALIDATE, invalidate)
            .await?;

        let tags_sink = sink.clone();
        let invalidate_tags: Handler = Arc::new(move |payload| {
            let sink = tags_sink.clone();
            Box::pin(async move {
                if let Ok(msg) = serde_json::from_slice::<InvalidateTagsMsg>(&payload) {
                    sink.apply_invalidate_tags(msg.tags).await;
                }
            })
        });
        self.transport
            .subscribe(CHANNEL_INVALIDATE_TAGS, invalidate_tags)
            .await?;

        let clear_sink = sink;
        let clear: Handler = Arc::new(move |_payload| {
            let sink = clear_sink.clone();
            Box::pin(async move {
                sink.apply_clear().await;
            })
        });
        self.transport.subscribe(CHANNEL_CLEAR, clear).await?;

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.unsubscribe(CHANNEL_INVALIDATE).await?;
        self.transport
            .unsubscribe(CHANNEL_INVALIDATE_TAGS)
            .await?;
        self.transport.unsubscribe(CHANNEL_CLEAR).await?;
        self.transport.disconnect().await
    }

    pub async fn publish_invalidate(&self, keys: Vec<String>) -> Result<()> {
        let payload = serde_json::to_vec(&InvalidateMsg { keys })
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.transport.publish(CHANNEL_INVALIDATE, payload).await
    }

    pub async fn publish_invalidate_tags(&self, tags: Vec<String>) -> Result<()> {
        let payload = serde_json::to_vec(&InvalidateTagsMsg { tags })
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.transport
            .publish(CHANNEL_INVALIDATE_TAGS, payload)
            .await
    }

    pub async fn publish_clear(&self) -> Result<()> {
        let payload = serde_json::to_vec(&ClearMsg::default())
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.transport.publish(CHANNEL_CLEAR, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// In-process transport backed by a broadcast channel per subscribed
    /// channel name; enough to exercise `CacheBus` without a real network.
    #[derive(Default)]
    struct LoopbackTransport {
        channels: Mutex<std::collections::HashMap<String, broadcast::Sender<Vec<u8>>>>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
            if let Some(tx) = self.channels.lock().unwrap().get(channel) {
                let _ = tx.send(payload);
            }
            Ok(())
        }
        async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()> {
            let mut rx = {
                let mut channels = self.channels.lock().unwrap();
                let tx = channels
                    .entry(channel.to_string())
                    .or_insert_with(|| broadcast::channel(16).0)
                    .clone();
                tx.subscribe()
            };
            tokio::spawn(async move {
                while let Ok(payload) = rx.recv().await {
                    handler(payload).await;
                }
            });
            Ok(())
        }
        async fn unsubscribe(&self, _channel: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        invalidated: std::sync::Mutex<Vec<String>>,
        cleared: AtomicUsize,
    }

    #[async_trait]
    impl CacheBusSink for RecordingSink {
        async fn apply_invalidate(&self, keys: Vec<String>) {
            self.invalidated.lock().unwrap().extend(keys);
        }
        async fn apply_invalidate_tags(&self, _tags: Vec<String>) {}
        async fn apply_clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_invalidate_reaches_connected_sink() {
        let transport = Arc::new(LoopbackTransport::default());
        let bus = CacheBus::new(transport);
        let sink = Arc::new(RecordingSink::default());
        bus.connect(sink.clone()).await.unwrap();

        bus.publish_invalidate(vec!["k1".to_string()]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*sink.invalidated.lock().unwrap(), vec!["k1".to_string()]);
    }

    #[tokio::test]
    async fn publish_clear_reaches_connected_sink() {
        let transport = Arc::new(LoopbackTransport::default());
        let bus = CacheBus::new(transport);
        let sink = Arc::new(RecordingSink::default());
        bus.connect(sink.clone()).await.unwrap();

        bus.publish_clear().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
    }
}
