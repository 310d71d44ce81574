//! Deduplicates concurrent loads for the same key into a single execution.
//!
//! At most one in-flight future per key per process; every concurrent caller
//! observes the same success or failure. If the loader fails, the failure is
//! broadcast to all waiters and the slot is freed so a later call re-enters
//! cleanly.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;

type Outcome<T, E> = Result<T, E>;

/// A single-flight registry keyed by string.
pub struct SingleFlight<T, E> {
    inflight: DashMap<String, broadcast::Sender<Outcome<T, E>>>,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Whether a loader is currently in flight for `key`.
    pub fn is_inflight(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    /// Run `fut` for `key` if no loader is currently in flight, joining the
    /// existing one otherwise. Every caller, leader and followers alike,
    /// receives the same outcome.
    pub async fn run_or_join<F>(&self, key: &str, fut: F) -> Outcome<T, E>
    where
        F: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        // Subscribing (for a follower) or registering (to become leader)
        // happens while the DashMap shard lock for this key is held, so
        // there is no window in which the leader could finish and remove the
        // entry between our occupancy check and our subscribe call.
        let joined = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(o) => Some(o.get().subscribe()),
            Entry::Vacant(v) => {
                let (tx, _rx) = broadcast::channel(1);
                v.insert(tx);
                None
            }
        };

        match joined {
            Some(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => unreachable!(
                    "single-flight leader always sends a result before dropping its sender"
                ),
            },
            None => {
                let result = fut.await;
                if let Some((_, tx)) = self.inflight.remove(key) {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn single_loader_runs_once_for_concurrent_callers() {
        let sf: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                sf.run_or_join("k", async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<u32, String>(42)
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_broadcast_and_slot_is_freed() {
        let sf: SingleFlight<u32, String> = SingleFlight::new();
        let result = sf
            .run_or_join("k", async { Err::<u32, String>("boom".to_string()) })
            .await;
        assert_eq!(result, Err("boom".to_string()));
        assert!(!sf.is_inflight("k"));

        // Re-entrant call after failure succeeds normally.
        let result = sf.run_or_join("k", async { Ok::<u32, String>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
