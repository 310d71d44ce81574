//! cachekit-core: entry model, driver contract, circuit breaker,
//! single-flight registry, and tag index for the cachekit two-tier cache
//! coordinator.

mod circuit;
mod driver;
mod duration;
mod entry;
mod error;
mod key;
mod metrics;
mod options;
mod serializer;
mod single_flight;
mod tag_index;

#[cfg(feature = "tracing")]
mod tracing_metrics;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig};
pub use driver::{L1Driver, L2Driver};
pub use duration::{from_millis, parse_duration};
pub use entry::CacheEntry;
pub use error::{CacheError, IntegrityError, Result};
pub use key::{CacheKey, CompositeKey};
pub use metrics::{CacheMetrics, CacheOperation, CacheTier, NoopMetrics};
pub use options::{CacheOpts, GetOptions, GetOrSetOptions, SetOptions};
pub use serializer::{JsonSerializer, Serializer};
pub use single_flight::SingleFlight;
pub use tag_index::TagIndex;

#[cfg(feature = "msgpack")]
pub use serializer::MsgPackSerializer;

#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;

#[cfg(feature = "tracing")]
pub use tracing_metrics::TracingMetrics;
