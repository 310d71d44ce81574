//! Durable in-memory retry queue with backoff, dead-lettering and a
//! periodic scheduler.
//!
//! The delay arithmetic and its overflow-safety idiom (`checked_mul`,
//! `saturating_pow`) follow `flyingrobots-ninelives`'s `Backoff` enum.
//! `Fibonacci` and `Custom` are cachekit's own additions on top of that.

use cachekit_core::CacheError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A strategy for spacing out retries. `Custom` carries a user function
/// rather than a trait object so `RetryQueueConfig` stays `Clone`+`Send` with
/// no boxed-trait plumbing.
#[derive(Clone)]
pub enum Backoff {
    Exponential { base: Duration, max: Option<Duration> },
    Linear { base: Duration },
    Fibonacci { base: Duration, max: Option<Duration> },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backoff::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            Backoff::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Backoff::Fibonacci { base, max } => f
                .debug_struct("Fibonacci")
                .field("base", base)
                .field("max", max)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn fib(n: u32) -> u64 {
    if n <= 2 {
        return 1;
    }
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 3..=n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn fibonacci(base: Duration) -> Self {
        Backoff::Fibonacci { base, max: None }
    }

    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Backoff::Custom(Arc::new(f))
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        match &mut self {
            Backoff::Exponential { max: m, .. } | Backoff::Fibonacci { max: m, .. } => {
                *m = Some(max);
            }
            _ => {}
        }
        self
    }

    /// Delay before the `attempt`-th retry (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = base.checked_mul(multiplier).unwrap_or(Duration::MAX);
                max.map_or(delay, |m| delay.min(m))
            }
            Backoff::Linear { base } => base.checked_mul(attempt).unwrap_or(Duration::MAX),
            Backoff::Fibonacci { base, max } => {
                let delay = base
                    .checked_mul(fib(attempt) as u32)
                    .unwrap_or(Duration::MAX);
                max.map_or(delay, |m| delay.min(m))
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

/// A message awaiting delivery.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: u64,
    pub channel: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub next_retry_at: Instant,
    pub first_failed_at: Instant,
    pub last_error: Option<String>,
}

/// `BinaryHeap` is a max-heap; invert the ordering so the earliest
/// `next_retry_at` sorts to the top.
#[derive(Debug, Clone)]
struct HeapEntry(QueuedMessage);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.next_retry_at == other.0.next_retry_at
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.next_retry_at.cmp(&self.0.next_retry_at)
    }
}

#[derive(Clone)]
pub struct RetryQueueConfig {
    pub base_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub remove_duplicates: bool,
    pub concurrency: usize,
    pub max_size: usize,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            interval: Duration::from_millis(200),
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            remove_duplicates: true,
            concurrency: 8,
            max_size: 10_000,
        }
    }
}

struct Inner {
    heap: BinaryHeap<HeapEntry>,
    dedup: HashMap<(String, Vec<u8>), u64>,
}

/// Durable-in-memory queue of messages awaiting (re)delivery. Owns its
/// message list; mutated only from `run_once`/`enqueue`, never concurrently
/// from both.
pub struct RetryQueue {
    config: RetryQueueConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl RetryQueue {
    pub fn new(config: RetryQueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                dedup: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a message for delivery on `channel`. Dedup (when enabled)
    /// replaces any pending message sharing `(channel, payload)` in place,
    /// preserving its heap slot's ordering cost by simply marking the old
    /// entry's id so the scheduler skips it if it's ever popped stale.
    pub fn enqueue(&self, channel: impl Into<String>, payload: Vec<u8>) -> Result<u64, CacheError> {
        let channel = channel.into();
        let mut inner = self.inner.lock();

        if self.config.remove_duplicates {
            if let Some(&existing_id) = inner.dedup.get(&(channel.clone(), payload.clone())) {
                return Ok(existing_id);
            }
        }

        if inner.heap.len() >= self.config.max_size {
            return Err(CacheError::Transport(format!(
                "retry queue full ({} messages); rejecting new message on {channel}",
                self.config.max_size
            )));
        }

        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let now = Instant::now();
        let msg = QueuedMessage {
            id,
            channel: channel.clone(),
            payload: payload.clone(),
            attempts: 0,
            next_retry_at: now,
            first_failed_at: now,
            last_error: None,
        };
        if self.config.remove_duplicates {
            inner.dedup.insert((channel, payload), id);
        }
        inner.heap.push(HeapEntry(msg));
        Ok(id)
    }

    fn due_batch(&self, now: Instant) -> Vec<QueuedMessage> {
        let mut inner = self.inner.lock();
        let mut batch = Vec::new();
        while batch.len() < self.config.concurrency {
            match inner.heap.peek() {
                Some(top) if top.0.next_retry_at <= now => {
                    let HeapEntry(msg) = inner.heap.pop().unwrap();
                    batch.push(msg);
                }
                _ => break,
            }
        }
        batch
    }

    fn requeue(&self, msg: QueuedMessage) {
        let mut inner = self.inner.lock();
        inner.heap.push(HeapEntry(msg));
    }

    fn forget(&self, msg: &QueuedMessage) {
        let mut inner = self.inner.lock();
        if self.config.remove_duplicates {
            if let Some(&id) = inner.dedup.get(&(msg.channel.clone(), msg.payload.clone())) {
                if id == msg.id {
                    inner.dedup.remove(&(msg.channel.clone(), msg.payload.clone()));
                }
            }
        }
    }

    /// Spawns a background task that drives `run_once` on a
    /// `tokio::time::interval` tick at the configured `interval`, using
    /// `MissedTickBehavior::Delay` so a slow publish batch doesn't cause a
    /// burst of immediate catch-up ticks. The scheduler runs until the
    /// returned handle is dropped or aborted.
    pub fn spawn_scheduler<P, Fut>(
        self: Arc<Self>,
        publish: P,
        on_retry: impl Fn(&QueuedMessage) + Send + Sync + 'static,
        on_dead_letter: impl Fn(&QueuedMessage) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()>
    where
        P: Fn(String, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CacheError>> + Send,
    {
        let interval = self.config.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once(&publish, &on_retry, &on_dead_letter).await;
            }
        })
    }

    /// Process one batch of due messages through `publish`. `on_retry` fires
    /// before every publish attempt (errors swallowed); `on_dead_letter`
    /// fires when a message exhausts `max_attempts`.
    pub async fn run_once<P, Fut>(
        &self,
        publish: P,
        on_retry: impl Fn(&QueuedMessage) + Send + Sync,
        on_dead_letter: impl Fn(&QueuedMessage) + Send + Sync,
    ) where
        P: Fn(String, Vec<u8>) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<(), CacheError>> + Send,
    {
        let batch = self.due_batch(Instant::now());
        if batch.is_empty() {
            return;
        }

        let results = futures::future::join_all(batch.into_iter().map(|mut msg| async move {
            msg.attempts += 1;
            on_retry(&msg);
            match publish(msg.channel.clone(), msg.payload.clone()).await {
                Ok(()) => (msg, true),
                Err(e) => {
                    msg.last_error = Some(e.to_string());
                    (msg, false)
                }
            }
        }))
        .await;

        for (msg, delivered) in results {
            if delivered {
                self.forget(&msg);
                continue;
            }
            if msg.attempts >= self.config.max_attempts {
                on_dead_letter(&msg);
                self.forget(&msg);
            } else {
                let mut msg = msg;
                msg.next_retry_at = Instant::now() + self.config.backoff.delay(msg.attempts);
                self.requeue(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let b = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn fibonacci_backoff_follows_sequence() {
        let b = Backoff::fibonacci(Duration::from_millis(10));
        assert_eq!(b.delay(1), Duration::from_millis(10));
        assert_eq!(b.delay(2), Duration::from_millis(10));
        assert_eq!(b.delay(3), Duration::from_millis(20));
        assert_eq!(b.delay(4), Duration::from_millis(30));
        assert_eq!(b.delay(5), Duration::from_millis(50));
    }

    #[test]
    fn exponential_backoff_never_overflows() {
        let b = Backoff::exponential(Duration::from_secs(1));
        let d = b.delay(200);
        assert!(d >= Duration::from_secs(1));
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let mut cfg = RetryQueueConfig::default();
        cfg.max_size = 1;
        let q = RetryQueue::new(cfg);
        q.enqueue("c", b"a".to_vec()).unwrap();
        assert!(q.enqueue("c", b"b".to_vec()).is_err());
    }

    #[test]
    fn dedup_replaces_pending_entry() {
        let q = RetryQueue::new(RetryQueueConfig::default());
        let id1 = q.enqueue("c", b"same".to_vec()).unwrap();
        let id2 = q.enqueue("c", b"same".to_vec()).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn run_once_delivers_and_drains() {
        let q = RetryQueue::new(RetryQueueConfig::default());
        q.enqueue("c", b"hello".to_vec()).unwrap();
        q.run_once(
            |_, _| async { Ok(()) },
            |_| {},
            |_| {},
        )
        .await;
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn run_once_dead_letters_after_max_attempts() {
        let mut cfg = RetryQueueConfig::default();
        cfg.max_attempts = 1;
        cfg.remove_duplicates = false;
        let q = RetryQueue::new(cfg);
        q.enqueue("c", b"boom".to_vec()).unwrap();
        let dead_lettered = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = dead_lettered.clone();
        q.run_once(
            |_, _| async { Err(CacheError::Transport("down".to_string())) },
            |_| {},
            move |_| flag.store(true, AtomicOrdering::SeqCst),
        )
        .await;
        assert!(dead_lettered.load(AtomicOrdering::SeqCst));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn spawn_scheduler_drains_without_manual_ticking() {
        let mut cfg = RetryQueueConfig::default();
        cfg.interval = Duration::from_millis(10);
        let q = Arc::new(RetryQueue::new(cfg));
        q.enqueue("c", b"hello".to_vec()).unwrap();

        let handle = q.clone().spawn_scheduler(
            |_, _| async { Ok(()) },
            |_| {},
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(q.is_empty());
    }
}
