//! Time abstraction for deterministic testing
//!
//! Every time-dependent component in this crate (circuit breaker recovery
//! windows, bulkhead queue budgets, resource staleness, error-boundary
//! windows) is generic over [`Clock`] so tests can drive time with
//! [`MockClock`] instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Controllable clock for tests.
///
/// Cloning shares the underlying elapsed counter, so a clone handed to a
/// component can be advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock anchored at the current instant.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by `duration` without sleeping.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the clock by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Total simulated time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        clock.advance_millis(500);

        assert_eq!(clock.now().duration_since(start), Duration::from_millis(5500));
    }

    #[test]
    fn test_mock_clock_clone_shares_time() {
        let clock1 = MockClock::new();
        let clock2 = clock1.clone();

        clock2.advance(Duration::from_secs(10));
        assert_eq!(clock1.elapsed(), Duration::from_secs(10));
    }
}
