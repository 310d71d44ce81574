//! Fail-fast circuit breaker shielding callers from a failing L2.
//!
//! Two states only, closed/open. There is deliberately no half-open trial
//! state: the first call made after `open_until` has elapsed drives recovery
//! directly, per the coordinator's no-half-open-probing contract.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// `{ consecutive_failures, open_until }` per the coordinator's circuit
/// state model.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    open_until: RwLock<Option<Instant>>,
    failure_threshold: u32,
    break_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            open_until: RwLock::new(None),
            failure_threshold: config.failure_threshold.max(1),
            break_duration: config.break_duration,
        }
    }

    /// True iff the circuit is open: `open_until` is set and `now <
    /// open_until`. If `open_until` has elapsed, it is atomically cleared
    /// and the failure counter reset before returning `false`. The recovery
    /// rule is driven entirely by this query, with no separate half-open
    /// admission step.
    pub fn is_open(&self) -> bool {
        let mut guard = self.open_until.write();
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                false
            }
            None => false,
        }
    }

    /// Record a failed L2 call. Trips the circuit once
    /// `consecutive_failures` reaches `failure_threshold`.
    pub fn report_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            *self.open_until.write() = Some(Instant::now() + self.break_duration);
        }
    }

    /// Record a successful L2 call, resetting the failure counter.
    pub fn report_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn closed_by_default() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert!(!cb.is_open());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            break_duration: Duration::from_millis(50),
        });
        cb.report_failure();
        assert!(!cb.is_open());
        cb.report_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn success_resets_counter() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            break_duration: Duration::from_millis(50),
        });
        cb.report_failure();
        cb.report_success();
        cb.report_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn recovers_after_break_duration_on_next_query() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            break_duration: Duration::from_millis(20),
        });
        cb.report_failure();
        assert!(cb.is_open());
        sleep(Duration::from_millis(30));
        assert!(!cb.is_open());
        // and the counter really was reset, not just the gate opened:
        cb.report_failure();
        assert!(cb.is_open());
    }
}
