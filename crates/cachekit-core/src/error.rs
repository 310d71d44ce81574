//! Error taxonomy for the cache coordinator.

use thiserror::Error;

/// Tampered or truncated message envelope. Always fatal for the message it
/// was found on; never retried (see [`CacheError::Integrity`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// The envelope was shorter than the signature it claims to carry.
    #[error("integrity envelope truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The signature did not match the payload.
    #[error("integrity signature mismatch")]
    Mismatch,
}

/// Main error type for all cache operations.
///
/// Variants correspond one-for-one to the error taxonomy: `Config` / `Driver`
/// (L1) / `Backend` (L2, circuit-trippable) / `Transport` / `Integrity` /
/// `DeadLetter` / `Loader`, plus a handful of ambient kinds (serialization,
/// internal, timeout) carried from ordinary cache-library practice.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Invalid duration, unknown driver name, missing required option.
    #[error("config error: {0}")]
    Config(String),

    /// L1 driver failure. Propagates to the caller.
    #[error("driver error: {0}")]
    Driver(String),

    /// L2 driver failure. Caught by the coordinator, fed to the circuit
    /// breaker, never surfaced as an `Err` from `get`/`set`/etc.
    #[error("backend error: {0}")]
    Backend(String),

    /// Publish/subscribe failure on the transport chain.
    #[error("transport error: {0}")]
    Transport(String),

    /// Tampered or truncated envelope.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A queued message exceeded `max_attempts`.
    #[error("dead letter: channel {channel} abandoned after {attempts} attempts")]
    DeadLetter { channel: String, attempts: u32 },

    /// `get_or_set` loader failure, propagated to all single-flight awaiters
    /// after retries are exhausted.
    #[error("loader error: {0}")]
    Loader(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// Operation timed out with no usable fallback value.
    #[error("operation timed out")]
    Timeout,
}

impl CacheError {
    /// Whether this error should trip the circuit breaker when observed on
    /// an L2 call.
    pub fn trips_circuit(&self) -> bool {
        matches!(self, CacheError::Backend(_) | CacheError::Timeout)
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Config("bad duration".to_string());
        assert_eq!(err.to_string(), "config error: bad duration");

        let err = CacheError::DeadLetter {
            channel: "cache:invalidate".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "dead letter: channel cache:invalidate abandoned after 3 attempts"
        );
    }

    #[test]
    fn test_integrity_from() {
        let err: CacheError = IntegrityError::Mismatch.into();
        assert!(matches!(err, CacheError::Integrity(IntegrityError::Mismatch)));
    }

    #[test]
    fn test_trips_circuit() {
        assert!(CacheError::Backend("down".into()).trips_circuit());
        assert!(CacheError::Timeout.trips_circuit());
        assert!(!CacheError::Config("x".into()).trips_circuit());
        assert!(!CacheError::Loader("x".into()).trips_circuit());
    }
}
