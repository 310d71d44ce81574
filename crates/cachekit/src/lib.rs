//! cachekit: a two-tier cache coordinator with stale-while-revalidate,
//! single-flight deduplication, tag-based invalidation, a circuit breaker
//! shielding callers from a failing L2, and cross-instance invalidation
//! through a pluggable message bus.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cachekit::prelude::*;
//! use cachekit_drivers::MemoryDriver;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let cache = Coordinator::new(MemoryDriver::default());
//!
//!     cache.set("key", 42i32, CacheOpts::new().stale_secs(60)).await?;
//!
//!     match cache.get::<i32, _>("key").await? {
//!         Some(value) => println!("got {value}"),
//!         None => println!("miss"),
//!     }
//!
//!     Ok(())
//! }
//! ```

mod coordinator;
mod swr;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use swr::AbortSignal;

// Re-export the core entry model, driver contract, circuit breaker,
// single-flight registry, tag index, options and error taxonomy.
pub use cachekit_core::*;

// Re-export the bus adapter, transport chain and retry queue.
pub use cachekit_bus::{
    Backoff, CacheBus, CacheBusSink, CompressionTransport, IntegrityTransport, QueuedMessage,
    RetryQueue, RetryQueueConfig, RetryTransport, Transport,
};

#[cfg(feature = "derive")]
pub use cachekit_derive::CacheKey as DeriveCacheKey;

/// Convenience re-exports for the common case.
pub mod prelude {
    pub use crate::{
        AbortSignal, CacheBus, CacheBusSink, CacheError, CacheKey, CacheOpts, Coordinator,
        CoordinatorConfig, GetOrSetOptions, JsonSerializer, Result, Serializer, SetOptions,
    };

    #[cfg(feature = "msgpack")]
    pub use crate::MsgPackSerializer;

    #[cfg(feature = "bincode")]
    pub use crate::BincodeSerializer;

    #[cfg(feature = "tracing")]
    pub use crate::TracingMetrics;

    #[cfg(feature = "derive")]
    pub use crate::DeriveCacheKey;
}
