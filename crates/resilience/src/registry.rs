//! Named circuit breaker registry
//!
//! [`CircuitBreakerRegistry`] lazily creates one breaker per operation name
//! so independent operations trip independently. The registry is plain
//! dependency-injected state, shared by cloning its `Arc`; there is no
//! process-global instance.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

/// Lazily-populated map of operation name to circuit breaker.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(default_config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(default_config, SystemClock)
    }

    pub fn with_defaults() -> Self {
        Self {
            default_config: CircuitBreakerConfig::default(),
            breakers: DashMap::new(),
            clock: SystemClock,
        }
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        default_config.validate()?;
        Ok(Self { default_config, breakers: DashMap::new(), clock })
    }

    /// Fetch the breaker for `name`, creating it on first use.
    ///
    /// `config` only applies at creation; an existing breaker keeps the
    /// configuration it was created with.
    pub fn get_or_create(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Result<Arc<CircuitBreaker<C>>, ConfigError> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(&existing));
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        config.validate()?;
        let entry = self.breakers.entry(name.to_string()).or_try_insert_with(|| {
            debug!(operation = name, "creating circuit breaker");
            CircuitBreaker::with_clock(name, config, self.clock.clone()).map(Arc::new)
        })?;
        Ok(Arc::clone(&entry))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|b| Arc::clone(&b))
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Metrics for every breaker, keyed by operation name.
    pub fn all_metrics(&self) -> HashMap<String, CircuitBreakerMetrics> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Force every breaker back to closed with cleared counters.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

impl<C: Clock + Clone> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry").field("breakers", &self.breakers.len()).finish()
    }
}
