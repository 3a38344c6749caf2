//! Graceful feature degradation under error pressure
//!
//! [`GracefulDegradationManager`] tracks cumulative error counts per
//! [`ErrorCategory`] and maps them onto discrete degradation levels that
//! enable or disable named features. Escalation is monotonic: error pressure
//! only ever moves the level upward, and the only way back down is an
//! explicit [`reset_error_counts`](GracefulDegradationManager::reset_error_counts)
//! by an operator or an external health check.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ErrorCategory};

type LevelObserver = Box<dyn Fn(&DegradationLevel) + Send + Sync>;

/// A named degradation level with its feature switches.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationLevel {
    /// Ordinal, 0 is full service. Higher is more degraded.
    pub level: u8,
    pub name: String,
    pub enabled_features: BTreeSet<String>,
    pub disabled_features: BTreeSet<String>,
}

impl DegradationLevel {
    pub fn new(level: u8, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            enabled_features: BTreeSet::new(),
            disabled_features: BTreeSet::new(),
        }
    }

    pub fn enable<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_features.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn disable<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_features.extend(features.into_iter().map(Into::into));
        self
    }
}

/// Configuration mapping error pressure to degradation levels.
#[derive(Clone)]
pub struct DegradationConfig {
    /// Levels sorted ascending by ordinal; must contain level 0.
    pub levels: Vec<DegradationLevel>,
    /// Cumulative error count at which a category starts escalating.
    pub thresholds: HashMap<ErrorCategory, u64>,
    /// Target level a category escalates to once over threshold.
    pub escalation: HashMap<ErrorCategory, u8>,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        let levels = vec![
            DegradationLevel::new(0, "full").enable([
                "core_operations",
                "parallel_execution",
                "caching",
                "background_sync",
                "speculative_prefetch",
                "telemetry_export",
            ]),
            DegradationLevel::new(1, "reduced")
                .enable(["core_operations", "parallel_execution", "caching", "telemetry_export"])
                .disable(["background_sync", "speculative_prefetch"]),
            DegradationLevel::new(2, "essential")
                .enable(["core_operations", "caching"])
                .disable(["parallel_execution", "background_sync", "speculative_prefetch", "telemetry_export"]),
            DegradationLevel::new(3, "emergency").enable(["core_operations"]).disable([
                "parallel_execution",
                "caching",
                "background_sync",
                "speculative_prefetch",
                "telemetry_export",
            ]),
        ];

        let thresholds = HashMap::from([
            (ErrorCategory::Network, 10),
            (ErrorCategory::Timeout, 10),
            (ErrorCategory::Resource, 5),
            (ErrorCategory::Storage, 5),
            (ErrorCategory::Availability, 15),
            (ErrorCategory::Internal, 3),
        ]);

        let escalation = HashMap::from([
            (ErrorCategory::Network, 1),
            (ErrorCategory::Timeout, 1),
            (ErrorCategory::Resource, 2),
            (ErrorCategory::Storage, 2),
            (ErrorCategory::Availability, 1),
            (ErrorCategory::Internal, 3),
        ]);

        Self { levels, thresholds, escalation }
    }
}

impl DegradationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::invalid("at least one degradation level is required"));
        }
        if self.levels[0].level != 0 {
            return Err(ConfigError::invalid("level 0 (full service) must be defined"));
        }
        let sorted = self.levels.windows(2).all(|pair| pair[0].level < pair[1].level);
        if !sorted {
            return Err(ConfigError::invalid("levels must be strictly ascending"));
        }
        for (category, target) in &self.escalation {
            if !self.levels.iter().any(|l| l.level == *target) {
                return Err(ConfigError::invalid(format!(
                    "escalation target {target} for category '{category}' is not a defined level"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DegradationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationConfig")
            .field("levels", &self.levels.len())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

struct DegradationInner {
    current: u8,
    error_counts: HashMap<ErrorCategory, u64>,
}

/// Monotonic degradation-level controller.
pub struct GracefulDegradationManager {
    config: DegradationConfig,
    inner: Mutex<DegradationInner>,
    observers: Mutex<Vec<LevelObserver>>,
}

impl GracefulDegradationManager {
    pub fn new(config: DegradationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(DegradationInner { current: 0, error_counts: HashMap::new() }),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: DegradationConfig::default(),
            inner: Mutex::new(DegradationInner { current: 0, error_counts: HashMap::new() }),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Notify `observer` whenever the level changes (in either direction).
    pub fn on_level_change<F>(&self, observer: F)
    where
        F: Fn(&DegradationLevel) + Send + Sync + 'static,
    {
        self.observers.lock().push(Box::new(observer));
    }

    fn level_definition(&self, ordinal: u8) -> &DegradationLevel {
        self.config
            .levels
            .iter()
            .find(|l| l.level == ordinal)
            .unwrap_or_else(|| self.config.levels.last().expect("validated non-empty"))
    }

    /// Account one error against `category`, escalating if its threshold is
    /// now exceeded. Escalation never lowers the level.
    pub fn record_error(&self, category: ErrorCategory) {
        let changed = {
            let mut inner = self.inner.lock();
            let count = inner.error_counts.entry(category).or_insert(0);
            *count += 1;
            let count = *count;

            let threshold = self.config.thresholds.get(&category).copied();
            let target = self.config.escalation.get(&category).copied();
            match (threshold, target) {
                (Some(threshold), Some(target)) if count >= threshold && target > inner.current => {
                    let previous = inner.current;
                    inner.current = target;
                    warn!(
                        %category,
                        errors = count,
                        from = previous,
                        to = target,
                        "degrading service level"
                    );
                    true
                }
                _ => {
                    debug!(%category, errors = count, "error recorded");
                    false
                }
            }
        };

        if changed {
            self.notify_observers();
        }
    }

    /// Clear all error counts and return to full service. The only way down.
    pub fn reset_error_counts(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.error_counts.clear();
            if inner.current != 0 {
                info!(from = inner.current, "error counts reset, restoring full service");
                inner.current = 0;
                true
            } else {
                false
            }
        };

        if changed {
            self.notify_observers();
        }
    }

    fn notify_observers(&self) {
        let level = self.current_level();
        for observer in self.observers.lock().iter() {
            observer(&level);
        }
    }

    pub fn current_level(&self) -> DegradationLevel {
        let current = self.inner.lock().current;
        self.level_definition(current).clone()
    }

    /// Whether `feature` is enabled at the current level.
    ///
    /// Features a level does not mention are treated as disabled.
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        let current = self.inner.lock().current;
        let level = self.level_definition(current);
        level.enabled_features.contains(feature) && !level.disabled_features.contains(feature)
    }

    pub fn error_counts(&self) -> HashMap<ErrorCategory, u64> {
        self.inner.lock().error_counts.clone()
    }
}

impl std::fmt::Debug for GracefulDegradationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulDegradationManager")
            .field("current", &self.inner.lock().current)
            .finish()
    }
}
