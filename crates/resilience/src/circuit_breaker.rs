//! Circuit breaker state machine
//!
//! Per-operation failure containment: the breaker runs in `CLOSED` until
//! either `failure_threshold` consecutive failures accumulate or the failure
//! rate inside the monitoring window exceeds 50% across at least
//! [`MIN_WINDOW_CALLS`] calls, then fails fast in `OPEN` until the recovery
//! timeout elapses. The first call after the timeout moves to `HALF_OPEN`,
//! where `success_threshold` successes close the circuit and any failure
//! re-opens it.
//!
//! State lives behind a single per-instance mutex; concurrent callers never
//! observe torn counters.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ErrorClassification, ResilienceError, ResilienceResult};

/// Minimum calls in the monitoring window before the failure-rate rule
/// applies.
const MIN_WINDOW_CALLS: usize = 10;

/// Rolling response-time sample cap; halved when exceeded.
const MAX_RESPONSE_SAMPLES: usize = 100;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Failing fast; calls are rejected until the recovery timeout elapses.
    Open,
    /// Probing recovery; successes close the circuit, any failure re-opens.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit from `CLOSED`.
    pub failure_threshold: u32,
    /// Successes in `HALF_OPEN` needed to close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays `OPEN` before probing recovery.
    pub recovery_timeout: Duration,
    /// Sliding window for the failure-rate trip rule.
    pub monitoring_window: Duration,
    /// Whether a success in `CLOSED` forgives the accumulated failure count.
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(60),
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.monitoring_window.is_zero() {
            return Err(ConfigError::invalid("monitoring_window must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn monitoring_window(mut self, window: Duration) -> Self {
        self.config.monitoring_window = window;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time circuit breaker metrics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub rejected_calls: u64,
    /// Mean of the rolling response-time samples.
    pub average_response_time: Duration,
    /// Failure rate inside the monitoring window (0.0 to 1.0).
    pub window_failure_rate: f64,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    /// `(at, failed)` call outcomes inside the monitoring window.
    window: VecDeque<(Instant, bool)>,
    response_samples: Vec<Duration>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    rejected_calls: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_at: None,
            window: VecDeque::new(),
            response_samples: Vec::new(),
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            rejected_calls: 0,
        }
    }

    fn prune_window(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / self.window.len() as f64
    }

    fn record_response_time(&mut self, elapsed: Duration) {
        if self.response_samples.len() >= MAX_RESPONSE_SAMPLES {
            self.response_samples.drain(..MAX_RESPONSE_SAMPLES / 2);
        }
        self.response_samples.push(elapsed);
    }

    fn average_response_time(&self) -> Duration {
        if self.response_samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_samples.iter().sum();
        total / self.response_samples.len() as u32
    }
}

/// Per-operation circuit breaker.
///
/// Instances are usually obtained through
/// [`CircuitBreakerRegistry`](crate::registry::CircuitBreakerRegistry), which
/// creates one per operation name.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock)
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            inner: Mutex::new(BreakerInner::new()),
            clock: SystemClock,
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { name: name.into(), config, inner: Mutex::new(BreakerInner::new()), clock })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call would be admitted right now, transitioning
    /// `OPEN -> HALF_OPEN` when the recovery timeout has elapsed.
    ///
    /// On rejection, returns the remaining wait as the error value.
    fn admit(&self) -> Result<(), Option<Duration>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = match inner.opened_at {
                    Some(at) => at,
                    None => return Err(None),
                };
                let elapsed = self.clock.now().duration_since(opened_at);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "circuit transitioning to HALF_OPEN");
                    Ok(())
                } else {
                    Err(Some(self.config.recovery_timeout - elapsed))
                }
            }
        }
    }

    /// Whether the breaker currently admits traffic.
    pub fn can_execute(&self) -> bool {
        self.admit().is_ok()
    }

    fn note_call(&self, failed: bool, elapsed: Option<Duration>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.total_calls += 1;
        inner.window.push_back((now, failed));
        inner.prune_window(now, self.config.monitoring_window);
        if let Some(elapsed) = elapsed {
            inner.record_response_time(elapsed);
        }

        if failed {
            inner.total_failures += 1;
            inner.failure_count += 1;
            inner.last_failure_at = Some(now);

            match inner.state {
                CircuitState::Closed => {
                    let rate_tripped = inner.window.len() >= MIN_WINDOW_CALLS
                        && inner.window_failure_rate() > 0.5;
                    if inner.failure_count >= self.config.failure_threshold || rate_tripped {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        warn!(
                            breaker = %self.name,
                            failures = inner.failure_count,
                            window_rate = inner.window_failure_rate(),
                            "circuit opened"
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(breaker = %self.name, "circuit re-opened by failure in HALF_OPEN");
                }
                CircuitState::Open => {}
            }
        } else {
            inner.total_successes += 1;
            match inner.state {
                CircuitState::Closed => {
                    if self.config.reset_on_success {
                        inner.failure_count = 0;
                    }
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.opened_at = None;
                        info!(
                            breaker = %self.name,
                            successes = inner.success_count,
                            "circuit closed after recovery"
                        );
                    }
                }
                CircuitState::Open => {
                    debug!(breaker = %self.name, "success recorded while circuit open");
                }
            }
        }
    }

    /// Record a success without running an operation through the breaker.
    pub fn record_success(&self) {
        self.note_call(false, None);
    }

    /// Record a failure without running an operation through the breaker.
    pub fn record_failure(&self) {
        self.note_call(true, None);
    }

    /// Execute `operation` with circuit breaker protection.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Err(retry_after) = self.admit() {
            self.inner.lock().rejected_calls += 1;
            debug!(breaker = %self.name, "rejecting call, circuit open");
            return Err(ResilienceError::CircuitOpen { operation: self.name.clone(), retry_after });
        }

        let started = self.clock.now();
        match operation().await {
            Ok(value) => {
                self.note_call(false, Some(self.clock.now().duration_since(started)));
                Ok(value)
            }
            Err(error) => {
                self.note_call(true, Some(self.clock.now().duration_since(started)));
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute `operation`, falling back to `fallback` when the circuit is
    /// open or when a recoverable failure occurs.
    ///
    /// A failing fallback never masks the primary failure: the original
    /// error is re-surfaced.
    #[instrument(skip(self, operation, fallback), fields(breaker = %self.name))]
    pub async fn execute_with_fallback<F, Fut, FB, FutB, T, E>(
        &self,
        operation: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        if let Err(retry_after) = self.admit() {
            self.inner.lock().rejected_calls += 1;
            return match fallback().await {
                Ok(value) => {
                    debug!(breaker = %self.name, "circuit open, fallback served the call");
                    Ok(value)
                }
                Err(_) => {
                    Err(ResilienceError::CircuitOpen { operation: self.name.clone(), retry_after })
                }
            };
        }

        let started = self.clock.now();
        match operation().await {
            Ok(value) => {
                self.note_call(false, Some(self.clock.now().duration_since(started)));
                Ok(value)
            }
            Err(error) => {
                self.note_call(true, Some(self.clock.now().duration_since(started)));
                if error.is_recoverable() {
                    match fallback().await {
                        Ok(value) => {
                            warn!(breaker = %self.name, error = %error, "primary failed, fallback succeeded");
                            return Ok(value);
                        }
                        Err(fallback_error) => {
                            warn!(
                                breaker = %self.name,
                                error = %fallback_error,
                                "fallback failed, surfacing original error"
                            );
                        }
                    }
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            rejected_calls: inner.rejected_calls,
            average_response_time: inner.average_response_time(),
            window_failure_rate: inner.window_failure_rate(),
        }
    }

    /// Force the breaker back to `CLOSED` and clear all accounting.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::new();
        info!(breaker = %self.name, "circuit breaker manually reset");
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("total_calls", &inner.total_calls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use thiserror::Error;

    use super::*;
    use crate::clock::MockClock;
    use crate::error::ErrorCategory;

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct TestError {
        message: String,
        recoverable: bool,
    }

    impl TestError {
        fn transient() -> Self {
            Self { message: "transient".to_string(), recoverable: true }
        }

        fn permanent() -> Self {
            Self { message: "permanent".to_string(), recoverable: false }
        }
    }

    impl ErrorClassification for TestError {
        fn is_recoverable(&self) -> bool {
            self.recoverable
        }

        fn category(&self) -> ErrorCategory {
            ErrorCategory::Network
        }
    }

    fn breaker_with_clock(
        clock: MockClock,
        configure: impl FnOnce(CircuitBreakerConfigBuilder) -> CircuitBreakerConfigBuilder,
    ) -> CircuitBreaker<MockClock> {
        let config = configure(CircuitBreakerConfig::builder()).build().unwrap();
        CircuitBreaker::with_clock("test_op", config, clock).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().build().is_ok());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_opens_at_failure_threshold() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(3));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_forgives_failures_while_closed() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(3));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        // The success reset the consecutive-failure count.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_no_reset_on_success_keeps_count() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(3).reset_on_success(false));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
    }

    /// Window rule: >50% failures across at least 10 calls opens the circuit
    /// even when consecutive failures never reach the threshold.
    #[test]
    fn test_failure_rate_window_opens_circuit() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock.clone(), |b| {
            b.failure_threshold(100).monitoring_window(Duration::from_secs(60))
        });

        // Alternate so the consecutive count stays at 1, 6 failures / 11 calls.
        for _ in 0..5 {
            cb.record_failure();
            cb.record_success();
            clock.advance_millis(10);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_old_window_entries_are_pruned() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock.clone(), |b| {
            b.failure_threshold(100).monitoring_window(Duration::from_secs(10))
        });

        for _ in 0..10 {
            cb.record_failure();
        }
        // Consecutive count is reset only by successes; pruning the window
        // means the rate rule no longer sees those failures.
        clock.advance(Duration::from_secs(30));
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.metrics().window_failure_rate, 0.5);
    }

    #[test]
    fn test_half_open_transition_after_recovery_timeout() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock.clone(), |b| {
            b.failure_threshold(1).recovery_timeout(Duration::from_secs(30))
        });

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(20));
        assert!(!cb.can_execute());

        clock.advance(Duration::from_secs(15));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock.clone(), |b| {
            b.failure_threshold(1).success_threshold(2).recovery_timeout(Duration::from_secs(1))
        });

        cb.record_failure();
        clock.advance(Duration::from_secs(2));
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens_with_new_deadline() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock.clone(), |b| {
            b.failure_threshold(1).recovery_timeout(Duration::from_secs(10))
        });

        cb.record_failure();
        clock.advance(Duration::from_secs(11));
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // The re-open stamped a fresh deadline.
        clock.advance(Duration::from_secs(5));
        assert!(!cb.can_execute());
        clock.advance(Duration::from_secs(6));
        assert!(cb.can_execute());
    }

    #[tokio::test]
    async fn test_execute_success_path() {
        let cb = CircuitBreaker::with_defaults("op");

        let result = cb.execute(|| async { Ok::<_, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.total_successes, 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_when_open_without_running_op() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(1));
        cb.record_failure();

        let mut ran = false;
        let result = cb
            .execute(|| {
                ran = true;
                async { Ok::<_, TestError>(1) }
            })
            .await;

        assert!(!ran, "operation body must not run while open");
        match result {
            Err(ResilienceError::CircuitOpen { retry_after, .. }) => {
                assert!(retry_after.is_some());
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_fallback_serves_open_circuit() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(1));
        cb.record_failure();

        let result = cb
            .execute_with_fallback(
                || async { Ok::<_, TestError>("primary") },
                || async { Ok::<_, TestError>("cached") },
            )
            .await;

        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_fallback_on_recoverable_failure() {
        let cb = CircuitBreaker::with_defaults("op");

        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>(TestError::transient()) },
                || async { Ok::<_, TestError>("cached") },
            )
            .await;

        assert_eq!(result.unwrap(), "cached");
        // The primary failure still counted against the breaker.
        assert_eq!(cb.metrics().total_failures, 1);
    }

    #[tokio::test]
    async fn test_fallback_skipped_for_non_recoverable_failure() {
        let cb = CircuitBreaker::with_defaults("op");

        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>(TestError::permanent()) },
                || async { Ok::<_, TestError>("cached") },
            )
            .await;

        match result {
            Err(ResilienceError::OperationFailed { source }) => {
                assert_eq!(source.message, "permanent");
            }
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }

    /// A failing fallback re-surfaces the original error, not its own.
    #[tokio::test]
    async fn test_failing_fallback_surfaces_original_error() {
        let cb = CircuitBreaker::with_defaults("op");

        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>(TestError::transient()) },
                || async { Err::<&str, _>(TestError { message: "fallback broke".to_string(), recoverable: false }) },
            )
            .await;

        match result {
            Err(ResilienceError::OperationFailed { source }) => {
                assert_eq!(source.message, "transient");
            }
            other => panic!("expected original error, got {other:?}"),
        }
    }

    #[test]
    fn test_response_samples_are_halved_at_cap() {
        let cb = CircuitBreaker::with_defaults("op");

        for _ in 0..MAX_RESPONSE_SAMPLES {
            cb.note_call(false, Some(Duration::from_millis(10)));
        }
        assert_eq!(cb.inner.lock().response_samples.len(), MAX_RESPONSE_SAMPLES);

        cb.note_call(false, Some(Duration::from_millis(10)));
        assert_eq!(cb.inner.lock().response_samples.len(), MAX_RESPONSE_SAMPLES / 2 + 1);
    }

    #[test]
    fn test_reset_returns_to_closed() {
        let clock = MockClock::new();
        let cb = breaker_with_clock(clock, |b| b.failure_threshold(1));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.metrics().total_calls, 0);
    }
}
