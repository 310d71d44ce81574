//! The stale-while-revalidate orchestrator: `get_or_set`'s hit-fresh /
//! hit-stale / miss decision tree, eager background refresh, loader retries
//! with backoff, and timeout-racing against an in-flight refresh.

use cachekit_bus::Backoff;
use cachekit_core::{
    CacheError, CacheKey, CacheMetrics, GetOrSetOptions, Result, Serializer, SetOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use cachekit_core::L1Driver;

/// Cooperative cancellation for loaders, since the dependency stack carries
/// no `tokio_util::CancellationToken`. A loader observing
/// [`AbortSignal::is_aborted`] should stop promptly; nothing forces it to.
#[derive(Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default retry backoff for loader failures.
fn default_backoff() -> Backoff {
    Backoff::exponential(Duration::from_millis(100))
}

impl<L1, S, M> Coordinator<L1, S, M>
where
    L1: L1Driver,
    S: Serializer,
    M: CacheMetrics,
{
    /// Stale-while-revalidate read: serve a fresh or stale cached value
    /// immediately when possible, refreshing in the background or racing a
    /// timeout as configured. `loader` receives an [`AbortSignal`] and
    /// resolves to the value to cache; it is never invoked more than once
    /// per in-flight load across concurrent callers (single-flight dedup
    /// keyed on the full key).
    pub async fn get_or_set<T, K, F, Fut>(
        &self,
        key: K,
        loader: F,
        opts: GetOrSetOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        K: CacheKey,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let full_key = self.full_key(&key);
        let set_opts = opts.set_options();
        let retries = opts.retries;

        let existing = self.fetch_entry(&full_key).await?;

        if let Some(entry) = &existing {
            if !opts.fresh && entry.is_fresh() {
                let eager_due = opts
                    .eager_refresh
                    .is_some_and(|threshold| entry.elapsed_fraction() >= threshold);
                if eager_due {
                    self.spawn_refresh::<T, F, Fut>(
                        full_key.clone(),
                        loader,
                        set_opts,
                        retries,
                        AbortSignal::new(),
                    );
                }
                return self.serializer.deserialize(&entry.value);
            }

            if !opts.fresh && entry.is_stale() {
                self.metrics.record_stale_hit(&full_key);
                let signal = AbortSignal::new();
                let handle = self.spawn_refresh_handle::<T, F, Fut>(
                    full_key.clone(),
                    loader,
                    set_opts,
                    retries,
                    signal.clone(),
                );

                return match opts.timeout {
                    None => self.serializer.deserialize(&entry.value),
                    Some(timeout) => match tokio::time::timeout(timeout, handle).await {
                        Ok(Ok(Ok(value))) => Ok(value),
                        // Loader failed or panicked before the timeout elapsed:
                        // still have a stale value, so serve it (errors swallowed
                        // per spec's "background refresh errors are swallowed").
                        Ok(Ok(Err(_))) | Ok(Err(_)) => self.serializer.deserialize(&entry.value),
                        Err(_elapsed) => {
                            if opts.abort_on_timeout {
                                signal.abort();
                            }
                            self.serializer.deserialize(&entry.value)
                        }
                    },
                };
            }
        }

        // Miss, or fresh=true forcing past a still-live entry. `fallback`
        // is that entry's raw bytes if one existed (a forced-fresh reload
        // can still fall back to its own prior value on timeout). A true
        // miss has none, so the timeout does not apply: the load is
        // awaited in full rather than timing out onto nothing.
        let fallback = existing.map(|e| e.value);
        let signal = AbortSignal::new();

        match (opts.timeout, fallback) {
            (Some(timeout), Some(stale_bytes)) => {
                let handle = self.spawn_refresh_handle::<T, F, Fut>(
                    full_key.clone(),
                    loader,
                    set_opts,
                    retries,
                    signal.clone(),
                );
                match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(e))) => Err(e),
                    Ok(Err(_join)) => {
                        Err(CacheError::Internal("refresh task panicked".to_string()))
                    }
                    Err(_elapsed) => {
                        if opts.abort_on_timeout {
                            signal.abort();
                        }
                        self.serializer.deserialize(&stale_bytes)
                    }
                }
            }
            _ => {
                self.metrics.record_miss(&full_key);
                self.clone()
                    .run_loader_with_retries(full_key, loader, set_opts, retries, signal)
                    .await
            }
        }
    }

    /// Fire-and-forget: run the loader in a detached task, swallowing its
    /// result entirely (spec: "background refresh errors are swallowed").
    fn spawn_refresh<T, F, Fut>(
        &self,
        full_key: String,
        loader: F,
        set_opts: SetOptions,
        retries: u32,
        signal: AbortSignal,
    ) where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let _: Result<T> = coordinator
                .run_loader_with_retries(full_key, loader, set_opts, retries, signal)
                .await;
        });
    }

    /// Same as [`Self::spawn_refresh`] but keeps the join handle so a caller
    /// can race it against a timeout.
    fn spawn_refresh_handle<T, F, Fut>(
        &self,
        full_key: String,
        loader: F,
        set_opts: SetOptions,
        retries: u32,
        signal: AbortSignal,
    ) -> tokio::task::JoinHandle<Result<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .run_loader_with_retries(full_key, loader, set_opts, retries, signal)
                .await
        })
    }

    /// Single-flights the loader for `full_key`, retrying failures up to
    /// `retries` times with exponential backoff, and on success writes the
    /// value through [`Coordinator::set_raw`] before returning it.
    async fn run_loader_with_retries<T, F, Fut>(
        self,
        full_key: String,
        loader: F,
        set_opts: SetOptions,
        retries: u32,
        signal: AbortSignal,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let single_flight = self.single_flight.clone();
        let serializer_for_result = self.serializer.clone();
        let key_for_inner = full_key.clone();
        let backoff = default_backoff();

        let inner = async move {
            let serializer = self.serializer.clone();
            let mut attempt = 0u32;
            loop {
                match loader(signal.clone()).await {
                    Ok(value) => {
                        let bytes = serializer.serialize(&value)?;
                        self.set_raw(&key_for_inner, bytes.clone(), set_opts.clone())
                            .await?;
                        return Ok(bytes);
                    }
                    Err(e) => {
                        if attempt >= retries {
                            return Err(e);
                        }
                        attempt += 1;
                        tokio::time::sleep(backoff.delay(attempt)).await;
                    }
                }
            }
        };

        let bytes = single_flight.run_or_join(&full_key, inner).await?;
        serializer_for_result.deserialize(&bytes)
    }
}
