//! Composed error recovery
//!
//! [`ErrorRecoveryOrchestrator`] wires the layers together for a named
//! operation: a per-name circuit breaker wraps a retry strategy wrapping the
//! caller's operation, failures are reported to the degradation manager, and
//! a registered fallback chain gets the last word before the error reaches
//! the caller. The breaker sits outside the retry loop so one exhausted
//! retry burst counts as a single breaker failure.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::clock::{Clock, SystemClock};
use crate::degradation::{DegradationLevel, GracefulDegradationManager};
use crate::error::{ConfigError, ErrorClassification, ResilienceError, ResilienceResult};
use crate::fallback::FallbackManager;
use crate::registry::CircuitBreakerRegistry;
use crate::retry::{RetryConfig, RetryStrategy};

/// Per-call knobs for [`ErrorRecoveryOrchestrator::execute_with_recovery`].
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    /// Breaker configuration used if this call creates the breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Ad-hoc retry configuration overriding any registered strategy.
    pub retry: Option<RetryConfig>,
    /// Consult the registered fallback chain on failure. On by default.
    pub use_fallback: Option<bool>,
}

impl RecoveryOptions {
    fn fallback_enabled(&self) -> bool {
        self.use_fallback.unwrap_or(true)
    }
}

/// Serializable snapshot of one breaker for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub state: String,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub average_response_ms: f64,
}

/// Aggregate health across the orchestrated layers.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub degradation: DegradationLevel,
    pub error_counts: BTreeMap<String, u64>,
    pub circuit_breakers: BTreeMap<String, BreakerHealth>,
    pub timestamp_ms: u64,
}

impl SystemHealth {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Coordinates breakers, retries, degradation, and fallbacks per operation
/// name.
pub struct ErrorRecoveryOrchestrator<C: Clock + Clone = SystemClock> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    degradation: Arc<GracefulDegradationManager>,
    default_retry: Arc<RetryStrategy>,
    retries: DashMap<String, Arc<RetryStrategy>>,
    // FallbackManager is generic over the call's value and error types, so
    // the chains are stored type-erased and recovered by downcast.
    fallbacks: DashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ErrorRecoveryOrchestrator<SystemClock> {
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::with_defaults()),
            Arc::new(GracefulDegradationManager::with_defaults()),
        )
    }
}

impl<C: Clock + Clone> ErrorRecoveryOrchestrator<C> {
    pub fn new(
        registry: Arc<CircuitBreakerRegistry<C>>,
        degradation: Arc<GracefulDegradationManager>,
    ) -> Self {
        Self {
            registry,
            degradation,
            default_retry: Arc::new(RetryStrategy::with_defaults()),
            retries: DashMap::new(),
            fallbacks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.registry
    }

    pub fn degradation(&self) -> &Arc<GracefulDegradationManager> {
        &self.degradation
    }

    /// Use `config` for every future call to `name` that does not override
    /// retry behavior itself.
    pub fn register_retry_override(
        &self,
        name: impl Into<String>,
        config: RetryConfig,
    ) -> Result<(), ConfigError> {
        let strategy = Arc::new(RetryStrategy::new(config)?);
        self.retries.insert(name.into(), strategy);
        Ok(())
    }

    /// Register the fallback chain consulted when `name` fails.
    ///
    /// The chain's types must match the call site's value and error types or
    /// it is treated as absent at lookup time.
    pub fn register_fallback<T, E>(
        &self,
        name: impl Into<String>,
        fallbacks: Arc<FallbackManager<T, ResilienceError<E>>>,
    ) where
        T: Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fallbacks.insert(name.into(), Box::new(fallbacks));
    }

    fn fallback_for<T, E>(&self, name: &str) -> Option<Arc<FallbackManager<T, ResilienceError<E>>>>
    where
        T: Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let entry = self.fallbacks.get(name)?;
        match entry.value().downcast_ref::<Arc<FallbackManager<T, ResilienceError<E>>>>() {
            Some(manager) => Some(Arc::clone(manager)),
            None => {
                warn!(operation = name, "registered fallback chain has mismatched types");
                None
            }
        }
    }

    fn resolve_retry(
        &self,
        name: &str,
        options: &RecoveryOptions,
    ) -> Result<Arc<RetryStrategy>, ConfigError> {
        if let Some(config) = &options.retry {
            return Ok(Arc::new(RetryStrategy::new(config.clone())?));
        }
        if let Some(registered) = self.retries.get(name) {
            return Ok(Arc::clone(&registered));
        }
        Ok(Arc::clone(&self.default_retry))
    }

    /// Run `operation` under the full recovery stack for `name`.
    ///
    /// Layering is breaker outermost, then retry, then the operation. On
    /// failure the flattened error is reported to the degradation manager
    /// and the registered fallback chain (if any, and if enabled) is
    /// consulted before the error is returned.
    #[instrument(skip(self, operation, options), fields(operation = name))]
    pub async fn execute_with_recovery<F, Fut, T, E>(
        &self,
        name: &str,
        options: &RecoveryOptions,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Send + Sync + 'static,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let breaker = self.registry.get_or_create(name, options.circuit_breaker.clone())?;
        let retry = self.resolve_retry(name, options)?;

        let result = breaker.execute(|| retry.execute(operation, name)).await;

        match result {
            Ok(value) => Ok(value),
            Err(outer) => {
                let error = outer.flatten();
                self.degradation.record_error(error.category());

                if options.fallback_enabled() {
                    if let Some(fallbacks) = self.fallback_for::<T, E>(name) {
                        debug!(operation = name, "consulting fallback chain");
                        return fallbacks.handle(error).await;
                    }
                }
                Err(error)
            }
        }
    }

    /// Snapshot of degradation state and every breaker.
    pub fn system_health(&self) -> SystemHealth {
        let error_counts = self
            .degradation
            .error_counts()
            .into_iter()
            .map(|(category, count)| (category.to_string(), count))
            .collect();

        let circuit_breakers = self
            .registry
            .all_metrics()
            .into_iter()
            .map(|(name, metrics)| {
                let health = BreakerHealth {
                    state: metrics.state.to_string(),
                    total_calls: metrics.total_calls,
                    total_failures: metrics.total_failures,
                    rejected_calls: metrics.rejected_calls,
                    average_response_ms: metrics.average_response_time.as_secs_f64() * 1000.0,
                };
                (name, health)
            })
            .collect();

        SystemHealth {
            degradation: self.degradation.current_level(),
            error_counts,
            circuit_breakers,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

impl<C: Clock + Clone> std::fmt::Debug for ErrorRecoveryOrchestrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryOrchestrator")
            .field("breakers", &self.registry.len())
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use thiserror::Error;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::error::{ErrorCategory, ErrorSeverity};
    use crate::fallback::FallbackStrategy;

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct TestError {
        message: String,
        category: ErrorCategory,
        recoverable: bool,
    }

    impl TestError {
        fn transient() -> Self {
            Self {
                message: "connection reset".to_string(),
                category: ErrorCategory::Network,
                recoverable: true,
            }
        }

        fn permanent() -> Self {
            Self {
                message: "schema mismatch".to_string(),
                category: ErrorCategory::Validation,
                recoverable: false,
            }
        }
    }

    impl ErrorClassification for TestError {
        fn is_recoverable(&self) -> bool {
            self.recoverable
        }

        fn category(&self) -> ErrorCategory {
            self.category
        }

        fn severity(&self) -> ErrorSeverity {
            ErrorSeverity::Warning
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .no_jitter()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retries_inside_breaker() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };
        let result = orchestrator
            .execute_with_recovery("flaky", &options, || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::transient())
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // The whole burst is one successful breaker call.
        let metrics = orchestrator.registry().all_metrics();
        assert_eq!(metrics["flaky"].total_calls, 1);
        assert_eq!(metrics["flaky"].total_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_burst_counts_one_breaker_failure() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };
        let result: ResilienceResult<(), TestError> = orchestrator
            .execute_with_recovery("down", &options, || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::transient())
                }
            })
            .await;

        match result {
            Err(ResilienceError::RetryExhausted { attempts: n, .. }) => assert_eq!(n, 3),
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(orchestrator.registry().all_metrics()["down"].total_failures, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        let options = RecoveryOptions {
            circuit_breaker: Some(
                CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap(),
            ),
            retry: Some(fast_retry()),
            ..Default::default()
        };

        let result: ResilienceResult<(), TestError> = orchestrator
            .execute_with_recovery("fragile", &options, || async { Err(TestError::transient()) })
            .await;
        assert!(result.is_err());
        assert_eq!(
            orchestrator.registry().get("fragile").unwrap().state(),
            CircuitState::Open
        );

        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);
        let result: ResilienceResult<(), TestError> = orchestrator
            .execute_with_recovery("fragile", &options, || {
                let ran = Arc::clone(&ran_clone);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        match result {
            Err(ResilienceError::CircuitOpen { .. }) => {}
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_serves_failed_operation() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();

        let fallbacks: FallbackManager<&str, ResilienceError<TestError>> =
            FallbackManager::new("lookup");
        fallbacks.register(FallbackStrategy::new("cache", 1, || async { Ok("cached") }));
        orchestrator.register_fallback("lookup", Arc::new(fallbacks));

        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };
        let result = orchestrator
            .execute_with_recovery("lookup", &options, || async {
                Err::<&str, _>(TestError::transient())
            })
            .await;

        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_fallback_can_be_disabled_per_call() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();

        let fallbacks: FallbackManager<&str, ResilienceError<TestError>> =
            FallbackManager::new("lookup");
        fallbacks.register(FallbackStrategy::new("cache", 1, || async { Ok("cached") }));
        orchestrator.register_fallback("lookup", Arc::new(fallbacks));

        let options = RecoveryOptions {
            retry: Some(fast_retry()),
            use_fallback: Some(false),
            ..Default::default()
        };
        let result = orchestrator
            .execute_with_recovery("lookup", &options, || async {
                Err::<&str, _>(TestError::transient())
            })
            .await;

        assert!(result.is_err());
    }

    /// A fallback registered with different types is ignored, not a panic.
    #[tokio::test]
    async fn test_mismatched_fallback_types_fall_through() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();

        let fallbacks: FallbackManager<u64, ResilienceError<TestError>> =
            FallbackManager::new("lookup");
        fallbacks.register(FallbackStrategy::new("cache", 1, || async { Ok(7) }));
        orchestrator.register_fallback("lookup", Arc::new(fallbacks));

        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };
        let result: ResilienceResult<&str, TestError> = orchestrator
            .execute_with_recovery("lookup", &options, || async {
                Err::<&str, _>(TestError::transient())
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failures_feed_degradation() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };

        let _res: ResilienceResult<(), TestError> = orchestrator
            .execute_with_recovery("op", &options, || async { Err(TestError::permanent()) })
            .await;

        let counts = orchestrator.degradation().error_counts();
        assert_eq!(counts[&ErrorCategory::Validation], 1);
    }

    #[tokio::test]
    async fn test_retry_override_per_name() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        orchestrator
            .register_retry_override(
                "single_shot",
                RetryConfig::builder()
                    .max_attempts(1)
                    .initial_delay(Duration::from_millis(1))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let result: ResilienceResult<(), TestError> = orchestrator
            .execute_with_recovery("single_shot", &RecoveryOptions::default(), || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::transient())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_system_health_snapshot() {
        let orchestrator = ErrorRecoveryOrchestrator::with_defaults();
        let options = RecoveryOptions { retry: Some(fast_retry()), ..Default::default() };

        let _res = orchestrator
            .execute_with_recovery("healthy", &options, || async {
                Ok::<_, TestError>(1)
            })
            .await;

        let health = orchestrator.system_health();
        assert_eq!(health.degradation.level, 0);
        assert_eq!(health.circuit_breakers["healthy"].state, "CLOSED");
        assert_eq!(health.circuit_breakers["healthy"].total_calls, 1);

        let json = health.to_json();
        assert_eq!(json["degradation"]["name"], "full");
        assert!(json["circuit_breakers"]["healthy"]["total_failures"].is_u64());
    }
}
