//! Soft deadlines for async operations
//!
//! [`TimeoutManager`] races an operation against a timer. The timeout is
//! *soft*: when the deadline fires the caller gets an
//! [`OperationTimeout`](crate::error::ResilienceError::OperationTimeout)
//! rejection, but the spawned operation is left running and its late result
//! is logged at debug level and discarded. Cooperative cancellation is the
//! operation's own responsibility; nothing here forcibly stops it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ResilienceError;

/// Raised by [`TimeoutManager::deadline`] when the timer wins the race.
#[derive(Debug, Error)]
#[error("operation '{operation}' timed out after {timeout:?}")]
pub struct TimeoutElapsed {
    pub operation: String,
    pub timeout: Duration,
}

/// Wraps operations with a hard deadline and a soft cancellation policy.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    default_timeout: Duration,
}

impl TimeoutManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Default deadline of 30 seconds.
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(30))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Race `future` against a deadline, returning its raw output.
    ///
    /// The future is spawned so it survives a lost race; the detached task's
    /// eventual output is dropped. Panics inside the operation are resumed on
    /// the caller.
    pub async fn deadline<T, Fut>(
        &self,
        operation: &str,
        timeout: Option<Duration>,
        future: Fut,
    ) -> Result<T, TimeoutElapsed>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut handle = tokio::task::spawn(future);

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_error)) => match join_error.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                // The runtime only cancels tasks it owns at shutdown; treat
                // it the same as the deadline firing.
                Err(_) => {
                    warn!(operation, "operation task cancelled by runtime");
                    Err(TimeoutElapsed { operation: operation.to_string(), timeout })
                }
            },
            Err(_) => {
                warn!(operation, ?timeout, "operation deadline elapsed, leaving task running");
                let name = operation.to_string();
                tokio::task::spawn(async move {
                    if handle.await.is_ok() {
                        debug!(operation = %name, "ignoring late completion of timed-out operation");
                    }
                });
                Err(TimeoutElapsed { operation: operation.to_string(), timeout })
            }
        }
    }

    /// Race a fallible operation against a deadline.
    ///
    /// `Ok` is returned through, the operation's own error becomes
    /// `OperationFailed`, and a lost race becomes `OperationTimeout`.
    pub async fn run<T, E, Fut>(
        &self,
        operation: &str,
        timeout: Option<Duration>,
        future: Fut,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.deadline(operation, timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ResilienceError::OperationFailed { source: error }),
            Err(TimeoutElapsed { operation, timeout }) => {
                Err(ResilienceError::OperationTimeout { operation, timeout })
            }
        }
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
