//! Error boundaries with sticky breach and recovery probes
//!
//! [`ErrorBoundary`] isolates a component by counting its errors over a
//! sliding time window. Once the count crosses the limit the boundary is
//! *breached* and stays breached even as old errors age out of the window;
//! only an explicit [`reset`](ErrorBoundary::reset) or a successful
//! [`attempt_recovery`](ErrorBoundary::attempt_recovery) probe clears it.
//! While breached, every execution is rejected immediately.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{BoxedError, ConfigError, ResilienceError, ResilienceResult};

type BreachCallback = Box<dyn Fn(&[String]) -> Result<(), BoxedError> + Send + Sync>;
type RecoveryProbe = Box<dyn Fn() -> BoxFuture<'static, Result<(), BoxedError>> + Send + Sync>;

/// Configuration for an error boundary.
#[derive(Debug, Clone)]
pub struct ErrorBoundaryConfig {
    /// Errors tolerated inside the window before the boundary breaches.
    pub max_errors: usize,
    /// Sliding window length.
    pub window: Duration,
}

impl Default for ErrorBoundaryConfig {
    fn default() -> Self {
        Self { max_errors: 10, window: Duration::from_secs(60) }
    }
}

impl ErrorBoundaryConfig {
    pub fn new(max_errors: usize, window: Duration) -> Self {
        Self { max_errors, window }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_errors == 0 {
            return Err(ConfigError::invalid("max_errors must be greater than 0"));
        }
        Ok(())
    }
}

/// Point-in-time boundary metrics.
#[derive(Debug, Clone)]
pub struct ErrorBoundaryMetrics {
    pub breached: bool,
    pub errors_in_window: usize,
    pub max_errors: usize,
    pub recovery_attempts: u64,
}

struct BoundaryInner {
    /// Error messages with their observation times, oldest first.
    errors: VecDeque<(String, Instant)>,
    breached: bool,
    recovery_attempts: u64,
}

impl BoundaryInner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((_, at)) = self.errors.front() {
            if now.duration_since(*at) > window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window error isolator for a single component.
pub struct ErrorBoundary<C: Clock = SystemClock> {
    component: String,
    config: ErrorBoundaryConfig,
    inner: Mutex<BoundaryInner>,
    on_breach: Option<BreachCallback>,
    recovery_probe: Option<RecoveryProbe>,
    clock: C,
}

impl ErrorBoundary<SystemClock> {
    pub fn new(component: impl Into<String>, config: ErrorBoundaryConfig) -> Result<Self, ConfigError> {
        Self::with_clock(component, config, SystemClock)
    }
}

impl<C: Clock> ErrorBoundary<C> {
    pub fn with_clock(
        component: impl Into<String>,
        config: ErrorBoundaryConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            component: component.into(),
            config,
            inner: Mutex::new(BoundaryInner {
                errors: VecDeque::new(),
                breached: false,
                recovery_attempts: 0,
            }),
            on_breach: None,
            recovery_probe: None,
            clock,
        })
    }

    /// Invoke `callback` with the windowed error messages when the boundary
    /// breaches. A failing callback is logged and otherwise ignored.
    pub fn with_on_breach<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[String]) -> Result<(), BoxedError> + Send + Sync + 'static,
    {
        self.on_breach = Some(Box::new(callback));
        self
    }

    /// Health probe consulted by [`attempt_recovery`](Self::attempt_recovery).
    pub fn with_recovery<F, Fut>(mut self, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxedError>> + Send + 'static,
    {
        self.recovery_probe = Some(Box::new(move || Box::pin(probe())));
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn is_breached(&self) -> bool {
        self.inner.lock().breached
    }

    /// Run `operation` unless the boundary is breached.
    ///
    /// Failures are recorded against the window; the error itself is passed
    /// through as `OperationFailed`.
    #[instrument(skip(self, operation), fields(component = %self.component))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        {
            let inner = self.inner.lock();
            if inner.breached {
                return Err(ResilienceError::BoundaryBreached {
                    component: self.component.clone(),
                    errors: inner.errors.len(),
                });
            }
        }

        match operation().await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.record_error(error.to_string());
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record an error against the window, breaching when the limit is hit.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        let now = self.clock.now();

        let breach_snapshot = {
            let mut inner = self.inner.lock();
            inner.prune(now, self.config.window);
            inner.errors.push_back((message, now));

            if !inner.breached && inner.errors.len() >= self.config.max_errors {
                inner.breached = true;
                warn!(
                    component = %self.component,
                    errors = inner.errors.len(),
                    window = ?self.config.window,
                    "error boundary breached"
                );
                Some(inner.errors.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>())
            } else {
                None
            }
        };

        if let Some(messages) = breach_snapshot {
            if let Some(callback) = &self.on_breach {
                if let Err(error) = callback(&messages) {
                    warn!(component = %self.component, error = %error, "breach callback failed");
                }
            }
        }
    }

    /// Probe the component and clear the breach if it reports healthy.
    ///
    /// Without a configured probe a breached boundary is cleared
    /// optimistically. Returns whether the boundary is usable afterwards.
    pub async fn attempt_recovery(&self) -> bool {
        let probe_future = {
            let mut inner = self.inner.lock();
            if !inner.breached {
                return true;
            }
            inner.recovery_attempts += 1;
            self.recovery_probe.as_ref().map(|probe| probe())
        };

        let healthy = match probe_future {
            Some(future) => match future.await {
                Ok(()) => true,
                Err(error) => {
                    debug!(component = %self.component, error = %error, "recovery probe failed");
                    false
                }
            },
            None => true,
        };

        if healthy {
            info!(component = %self.component, "boundary recovered, clearing breach");
            let mut inner = self.inner.lock();
            inner.breached = false;
            inner.errors.clear();
            inner.recovery_attempts = 0;
        }
        healthy
    }

    /// Clear the breach, the error history, and the attempt counter
    /// unconditionally.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.breached = false;
        inner.errors.clear();
        inner.recovery_attempts = 0;
        debug!(component = %self.component, "boundary reset");
    }

    pub fn metrics(&self) -> ErrorBoundaryMetrics {
        let mut inner = self.inner.lock();
        inner.prune(self.clock.now(), self.config.window);
        ErrorBoundaryMetrics {
            breached: inner.breached,
            errors_in_window: inner.errors.len(),
            max_errors: self.config.max_errors,
            recovery_attempts: inner.recovery_attempts,
        }
    }
}

impl<C: Clock> std::fmt::Debug for ErrorBoundary<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("component", &self.component)
            .field("breached", &self.inner.lock().breached)
            .finish()
    }
}
