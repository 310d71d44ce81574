//! cachekit-bus: the cache bus adapter (C8), transport middleware chain
//! (C9), and retry queue (C10) for cross-instance cache invalidation.

mod bus;
mod retry_queue;
mod transport;

pub use bus::{
    CacheBus, CacheBusSink, ClearMsg, InvalidateMsg, InvalidateTagsMsg, CHANNEL_CLEAR,
    CHANNEL_INVALIDATE, CHANNEL_INVALIDATE_TAGS,
};
pub use retry_queue::{Backoff, QueuedMessage, RetryQueue, RetryQueueConfig};
pub use transport::{CompressionTransport, Handler, IntegrityTransport, RetryTransport, Transport};
