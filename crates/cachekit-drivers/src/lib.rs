//! cachekit-drivers: L1 and L2 driver implementations for cachekit.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{FailingDriver, MemoryConfig, MemoryDriver};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisDriver};
