//! Resilience engine for distributed agent workloads.
//!
//! Composable failure-handling layers, each usable on its own and wired
//! together by [`ErrorRecoveryOrchestrator`]:
//!
//! - [`TimeoutManager`]: soft deadlines that reject the caller without
//!   cancelling the operation
//! - [`ResourceManager`]: typed allocation tracking with limits and stale
//!   reclamation
//! - [`CircuitBreaker`] and [`CircuitBreakerRegistry`]: per-operation
//!   fail-fast state machines
//! - [`RetryStrategy`]: exponential backoff with jitter, gated by the
//!   caller's [`ErrorClassification`]
//! - [`Bulkhead`]: concurrency limits with priority queueing
//! - [`FallbackManager`]: prioritized, condition-guarded alternatives
//! - [`ErrorBoundary`]: sliding-window component isolation
//! - [`GracefulDegradationManager`]: monotonic feature shedding under error
//!   pressure
//! - [`EmergencyShutdownSystem`]: ordered, time-boxed, best-effort shutdown
//!
//! The engine never interprets domain failures itself; callers implement
//! [`ErrorClassification`] on their error types and the layers act on that
//! classification.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod boundary;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod degradation;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod shutdown;
pub mod timeout;

pub use boundary::{ErrorBoundary, ErrorBoundaryConfig, ErrorBoundaryMetrics};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use degradation::{DegradationConfig, DegradationLevel, GracefulDegradationManager};
pub use error::{
    BoxedError, ConfigError, ErrorCategory, ErrorClassification, ErrorSeverity, ResilienceError,
    ResilienceResult,
};
pub use fallback::{FallbackManager, FallbackStrategy};
pub use orchestrator::{ErrorRecoveryOrchestrator, RecoveryOptions, SystemHealth};
pub use registry::CircuitBreakerRegistry;
pub use resource::{
    ResourceError, ResourceKind, ResourceLimits, ResourceManager, ResourceMetrics, ResourceRequest,
};
pub use retry::{RetryConfig, RetryStrategy};
pub use shutdown::{
    EmergencyProcedure, EmergencyShutdownSystem, ProcedureOutcome, ShutdownReport,
};
pub use timeout::{TimeoutElapsed, TimeoutManager};
