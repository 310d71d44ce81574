//! Pub/sub transport contract plus the compression/integrity/retry
//! middleware chain that wraps it.
//!
//! Layer order at build time, innermost to outermost: base, then retry,
//! then compression, then integrity. Each middleware both re-exposes
//! `Transport` and transforms the bytes crossing it, so composing them is
//! just nested construction: `Integrity::new(Compression::new(Retry::new(base)))`.

use async_trait::async_trait;
use cachekit_core::{CacheError, IntegrityError, Result};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::retry_queue::RetryQueue;

/// Invoked with the decoded payload of an incoming message.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A publish/subscribe transport. Implementations own connection setup and
/// channel bookkeeping; middlewares only transform bytes and handlers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()>;
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}

const COMPRESSION_THRESHOLD: usize = 256;
const MARKER_PLAIN: u8 = 0;
const MARKER_ZSTD: u8 = 1;

/// Compresses publishes above `threshold` bytes with zstd when doing so
/// actually shrinks the payload; prepends a one-byte marker either way.
/// Adapted from a `Compressor`-style value-compression hook into envelope
/// framing around a whole publish.
pub struct CompressionTransport<T> {
    inner: T,
    threshold: usize,
    level: i32,
}

impl<T: Transport> CompressionTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            threshold: COMPRESSION_THRESHOLD,
            level: 3,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl<T: Transport> Transport for CompressionTransport<T> {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let framed = if payload.len() >= self.threshold {
            match zstd::encode_all(payload.as_slice(), self.level) {
                Ok(compressed) if compressed.len() < payload.len() => {
                    let mut out = Vec::with_capacity(compressed.len() + 1);
                    out.push(MARKER_ZSTD);
                    out.extend_from_slice(&compressed);
                    out
                }
                _ => {
                    let mut out = Vec::with_capacity(payload.len() + 1);
                    out.push(MARKER_PLAIN);
                    out.extend_from_slice(&payload);
                    out
                }
            }
        } else {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(MARKER_PLAIN);
            out.extend_from_slice(&payload);
            out
        };
        self.inner.publish(channel, framed).await
    }

    async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()> {
        let wrapped: Handler = Arc::new(move |framed: Vec<u8>| {
            let handler = handler.clone();
            Box::pin(async move {
                match decode_frame(&framed) {
                    Ok(payload) => handler(payload).await,
                    Err(_) => {}
                }
            })
        });
        self.inner.subscribe(channel, wrapped).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.unsubscribe(channel).await
    }
}

fn decode_frame(framed: &[u8]) -> Result<Vec<u8>> {
    let (marker, body) = framed
        .split_first()
        .ok_or_else(|| CacheError::Transport("empty frame".to_string()))?;
    match *marker {
        MARKER_PLAIN => Ok(body.to_vec()),
        MARKER_ZSTD => {
            zstd::decode_all(body).map_err(|e| CacheError::Transport(format!("decompress: {e}")))
        }
        other => Err(CacheError::Transport(format!(
            "unknown compression marker {other}"
        ))),
    }
}

type HmacSha256 = Hmac<Sha256>;
const HMAC_LEN: usize = 32;

/// Appends an HMAC-SHA256 tag to every publish and verifies/strips it on
/// subscribe, constant-time.
pub struct IntegrityTransport<T> {
    inner: T,
    key: Vec<u8>,
}

fn hmac_sign(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_verify_and_strip(key: &[u8], signed: &[u8]) -> Result<Vec<u8>> {
    if signed.len() < HMAC_LEN {
        return Err(IntegrityError::Truncated {
            expected: HMAC_LEN,
            actual: signed.len(),
        }
        .into());
    }
    let split_at = signed.len() - HMAC_LEN;
    let (payload, tag) = signed.split_at(split_at);
    let expected = hmac_sign(key, payload);
    if expected.ct_eq(tag).unwrap_u8() == 1 {
        Ok(payload.to_vec())
    } else {
        Err(IntegrityError::Mismatch.into())
    }
}

impl<T: Transport> IntegrityTransport<T> {
    pub fn new(inner: T, key: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            key: key.into(),
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for IntegrityTransport<T> {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let tag = hmac_sign(&self.key, &payload);
        let mut signed = payload;
        signed.extend_from_slice(&tag);
        self.inner.publish(channel, signed).await
    }

    async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()> {
        let key = self.key.clone();
        let wrapped: Handler = Arc::new(move |signed: Vec<u8>| {
            let handler = handler.clone();
            let key = key.clone();
            Box::pin(async move {
                if let Ok(payload) = hmac_verify_and_strip(&key, &signed) {
                    handler(payload).await;
                }
            })
        });
        self.inner.subscribe(channel, wrapped).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.unsubscribe(channel).await
    }
}

/// On publish failure, enqueue into the retry queue and report success to
/// the caller (fire-and-forget); the queue's scheduler drives actual
/// redelivery against the same inner transport.
pub struct RetryTransport<T> {
    inner: Arc<T>,
    queue: Arc<RetryQueue>,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: Arc<T>, queue: Arc<RetryQueue>) -> Self {
        Self { inner, queue }
    }

    /// Run one scheduler tick, redelivering whatever is due.
    pub async fn tick(
        &self,
        on_retry: impl Fn(&crate::retry_queue::QueuedMessage) + Send + Sync,
        on_dead_letter: impl Fn(&crate::retry_queue::QueuedMessage) + Send + Sync,
    ) {
        let inner = self.inner.clone();
        self.queue
            .run_once(
                move |channel, payload| {
                    let inner = inner.clone();
                    async move { inner.publish(&channel, payload).await }
                },
                on_retry,
                on_dead_letter,
            )
            .await;
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        match self.inner.publish(channel, payload.clone()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.queue.enqueue(channel, payload)?;
                Ok(())
            }
        }
    }

    async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()> {
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.unsubscribe(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingTransport {
        published: AsyncMutex<Vec<(String, Vec<u8>)>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CacheError::Transport("injected".to_string()));
            }
            self.published.lock().await.push((channel.to_string(), payload));
            Ok(())
        }
        async fn subscribe(&self, _channel: &str, _handler: Handler) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _channel: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn compression_roundtrips_large_payloads() {
        let base = Arc::new(RecordingTransport::default());
        let transport = CompressionTransport::new(base.clone());
        let payload = vec![b'x'; 1024];
        transport.publish("c", payload.clone()).await.unwrap();
        let (_, framed) = base.published.lock().await[0].clone();
        let decoded = decode_frame(&framed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn compression_skips_small_payloads() {
        let base = Arc::new(RecordingTransport::default());
        let transport = CompressionTransport::new(base.clone());
        transport.publish("c", b"hi".to_vec()).await.unwrap();
        let (_, framed) = base.published.lock().await[0].clone();
        assert_eq!(framed[0], MARKER_PLAIN);
    }

    #[tokio::test]
    async fn integrity_rejects_tampered_payload() {
        let base = Arc::new(RecordingTransport::default());
        let transport = IntegrityTransport::new(base.clone(), b"secret".to_vec());
        transport.publish("c", b"hello".to_vec()).await.unwrap();
        let (_, mut signed) = base.published.lock().await[0].clone();
        *signed.last_mut().unwrap() ^= 0xFF;
        assert!(hmac_verify_and_strip(b"secret", &signed).is_err());
    }

    #[tokio::test]
    async fn retry_transport_enqueues_on_failure_and_reports_success() {
        let base = Arc::new(RecordingTransport::default());
        base.fail_next.store(true, Ordering::SeqCst);
        let queue = Arc::new(RetryQueue::new(crate::retry_queue::RetryQueueConfig::default()));
        let transport = RetryTransport::new(base.clone(), queue.clone());
        let result = transport.publish("c", b"payload".to_vec()).await;
        assert!(result.is_ok());
        assert_eq!(queue.len(), 1);
    }
}
