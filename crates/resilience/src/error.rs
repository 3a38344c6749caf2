//! Error taxonomy and classification for the resilience engine
//!
//! The engine never classifies domain failures itself: callers implement
//! [`ErrorClassification`] on their error types to tell the retry and
//! circuit-breaker layers whether a failure is transient and which pressure
//! category it counts against. The engine's own rejections (open circuit,
//! full bulkhead queue, breached boundary, exhausted retries) are synthesized
//! as [`ResilienceError`] variants, distinct from the underlying cause, and
//! surfaced to the caller as fast-fail signals.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type for release callbacks, fallback handlers, and probes.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for resilience operations.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Pressure category an error counts against.
///
/// Consumed by [`RetryStrategy`](crate::retry::RetryStrategy) (retryable set)
/// and [`GracefulDegradationManager`](crate::degradation::GracefulDegradationManager)
/// (cumulative counts and escalation thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Connectivity and remote-service failures.
    Network,
    /// Deadline expirations.
    Timeout,
    /// Memory, handle, or budget exhaustion.
    Resource,
    /// Persistence and database failures.
    Storage,
    /// WASM runtime failures.
    Wasm,
    /// Agent execution failures.
    Agent,
    /// Invalid input or configuration.
    Validation,
    /// Fast-fail rejections from protective layers (open circuit, full
    /// bulkhead, breached boundary).
    Availability,
    /// Bugs and invariant violations.
    Internal,
    /// Anything the caller did not classify.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Storage => "storage",
            Self::Wasm => "wasm",
            Self::Agent => "agent",
            Self::Validation => "validation",
            Self::Availability => "availability",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Severity level for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Externally supplied error classification.
///
/// Implemented by the caller's error types. The engine consumes the
/// classification, it never performs it: `is_recoverable` gates retries and
/// circuit-breaker fallbacks, `category` feeds degradation accounting.
pub trait ErrorClassification {
    /// Whether the failure is transient and worth retrying.
    fn is_recoverable(&self) -> bool;

    /// Pressure category the failure counts against.
    fn category(&self) -> ErrorCategory;

    /// Severity for monitoring. Defaults to [`ErrorSeverity::Error`].
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }
}

/// Simple configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Errors produced by the resilience layers, generic over the caller's error
/// type `E` so the original failure is preserved as a `source`.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open and the recovery timeout has not elapsed.
    #[error("circuit breaker open for '{operation}'")]
    CircuitOpen { operation: String, retry_after: Option<Duration> },

    /// Bulkhead queue is at capacity; rejected synchronously.
    #[error("bulkhead '{operation}' queue full ({queue_size} queued, {max_concurrent} running)")]
    BulkheadQueueFull { operation: String, max_concurrent: usize, queue_size: usize },

    /// Operation exceeded its deadline (or its bulkhead queue budget).
    #[error("operation '{operation}' timed out after {timeout:?}")]
    OperationTimeout { operation: String, timeout: Duration },

    /// Error boundary is breached and failing fast.
    #[error("error boundary '{component}' breached ({errors} errors in window)")]
    BoundaryBreached { component: String, errors: usize },

    /// All retry attempts were consumed; carries the last failure.
    #[error("all {attempts} retry attempts exhausted")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The underlying operation failed and was not (or could not be) retried.
    #[error("operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// Configuration was rejected at construction time.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The original caller error, when one exists.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

impl<E> From<ConfigError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: ConfigError) -> Self {
        Self::InvalidConfiguration { message: error.to_string() }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_recoverable(&self) -> bool {
        match self {
            // Rejections from protective layers clear once pressure subsides.
            Self::CircuitOpen { .. } | Self::BulkheadQueueFull { .. } => true,
            Self::OperationTimeout { .. } => true,
            Self::BoundaryBreached { .. } => false,
            // Retries were already spent on this failure.
            Self::RetryExhausted { .. } => false,
            Self::OperationFailed { source } => source.is_recoverable(),
            Self::InvalidConfiguration { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::CircuitOpen { .. }
            | Self::BulkheadQueueFull { .. }
            | Self::BoundaryBreached { .. } => ErrorCategory::Availability,
            Self::OperationTimeout { .. } => ErrorCategory::Timeout,
            Self::RetryExhausted { source, .. } | Self::OperationFailed { source } => {
                source.category()
            }
            Self::InvalidConfiguration { .. } => ErrorCategory::Validation,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. }
            | Self::BulkheadQueueFull { .. }
            | Self::OperationTimeout { .. } => ErrorSeverity::Warning,
            Self::BoundaryBreached { .. } | Self::RetryExhausted { .. } => ErrorSeverity::Error,
            Self::OperationFailed { source } => source.severity(),
            Self::InvalidConfiguration { .. } => ErrorSeverity::Error,
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Collapse one level of nesting.
    ///
    /// Composing layers (circuit breaker around retry) produces
    /// `ResilienceError<ResilienceError<E>>`; the outer `OperationFailed`
    /// wrapper adds nothing over the inner rejection it carries.
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            Self::OperationFailed { source } => source,
            Self::RetryExhausted { source, .. } => source,
            Self::CircuitOpen { operation, retry_after } => {
                ResilienceError::CircuitOpen { operation, retry_after }
            }
            Self::BulkheadQueueFull { operation, max_concurrent, queue_size } => {
                ResilienceError::BulkheadQueueFull { operation, max_concurrent, queue_size }
            }
            Self::OperationTimeout { operation, timeout } => {
                ResilienceError::OperationTimeout { operation, timeout }
            }
            Self::BoundaryBreached { component, errors } => {
                ResilienceError::BoundaryBreached { component, errors }
            }
            Self::InvalidConfiguration { message } => {
                ResilienceError::InvalidConfiguration { message }
            }
        }
    }
}
