//! Retry with exponential backoff and jitter
//!
//! [`RetryStrategy`] re-runs a failing operation while the externally
//! supplied classification says the failure is transient AND its category is
//! in the configured retryable set. Non-retryable failures are terminal on
//! the first attempt. Exhausting the attempt budget surfaces
//! [`RetryExhausted`](crate::error::ResilienceError::RetryExhausted) carrying
//! the last error.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConfigError, ErrorCategory, ErrorClassification, ResilienceError};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt: `initial_delay * base^(attempt - 1)`.
    pub exponential_base: f64,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Scale each delay into `[0.5, 1.0] x delay` to avoid retry storms.
    pub jitter: bool,
    /// Categories eligible for retry; everything else is terminal.
    pub retryable_categories: HashSet<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            retryable_categories: HashSet::from([
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::Resource,
                ErrorCategory::Availability,
            ]),
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        if self.exponential_base <= 0.0 {
            return Err(ConfigError::invalid("exponential_base must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = false;
        self
    }

    pub fn retryable_categories<I: IntoIterator<Item = ErrorCategory>>(
        mut self,
        categories: I,
    ) -> Self {
        self.config.retryable_categories = categories.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Retries an operation with exponential backoff, bounded by the caller's
/// error classification.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff delay after the `attempt`-th failed attempt (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.config.initial_delay.as_millis() as f64
            * self.config.exponential_base.powi(exponent);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        let delay = Duration::from_millis(capped as u64);

        if self.config.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    fn is_retryable<E: ErrorClassification>(&self, error: &E) -> bool {
        error.is_recoverable() && self.config.retryable_categories.contains(&error.category())
    }

    /// Execute `operation`, retrying transient failures with backoff.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        mut operation: F,
        operation_name: &str,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let mut attempt: u32 = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt, "operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        debug!(
                            operation = operation_name,
                            category = %error.category(),
                            "failure is not retryable"
                        );
                        return Err(ResilienceError::OperationFailed { source: error });
                    }

                    if attempt >= self.config.max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "retry attempts exhausted"
                        );
                        return Err(ResilienceError::RetryExhausted { attempts: attempt, source: error });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        ?delay,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::with_defaults()
    }
}
