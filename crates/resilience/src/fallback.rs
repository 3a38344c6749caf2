//! Prioritized fallback chains
//!
//! [`FallbackManager`] holds named alternative strategies for an operation
//! class. When the primary path fails, registered strategies are tried in
//! ascending priority order (lower numbers first). Each strategy may carry a
//! condition predicate inspecting the original error; strategies whose
//! condition rejects are skipped without execution. If every strategy fails
//! or is skipped, the caller gets the *original* error back, never the last
//! fallback's.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::BoxedError;

type Condition<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Handler<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, BoxedError>> + Send + Sync>;

/// A single named fallback with a priority and an optional applicability
/// condition.
pub struct FallbackStrategy<T, E> {
    name: String,
    priority: u8,
    condition: Option<Condition<E>>,
    handler: Handler<T>,
}

impl<T, E> FallbackStrategy<T, E> {
    pub fn new<F, Fut>(name: impl Into<String>, priority: u8, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, BoxedError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            condition: None,
            handler: Box::new(move || Box::pin(handler())),
        }
    }

    /// Restrict this strategy to errors the predicate accepts.
    pub fn when<P>(mut self, condition: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }
}

/// Ordered collection of fallback strategies for one operation class.
pub struct FallbackManager<T, E> {
    component: String,
    strategies: RwLock<Vec<FallbackStrategy<T, E>>>,
}

impl<T, E> FallbackManager<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into(), strategies: RwLock::new(Vec::new()) }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Register a strategy, keeping the chain sorted by ascending priority.
    pub fn register(&self, strategy: FallbackStrategy<T, E>) {
        debug!(
            component = %self.component,
            strategy = %strategy.name,
            priority = strategy.priority,
            "registering fallback strategy"
        );
        let mut strategies = self.strategies.write();
        strategies.push(strategy);
        strategies.sort_by_key(|s| s.priority);
    }

    pub fn len(&self) -> usize {
        self.strategies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.read().is_empty()
    }

    /// Try each applicable strategy in priority order.
    ///
    /// The first strategy that succeeds wins. Strategies whose condition
    /// rejects `original` are skipped; strategy failures are logged and the
    /// chain continues. When nothing succeeds the original error is returned
    /// unchanged.
    #[instrument(skip(self, original), fields(component = %self.component))]
    pub async fn handle(&self, original: E) -> Result<T, E> {
        // Build the futures under the read lock, await after releasing it.
        let candidates: Vec<(String, BoxFuture<'static, Result<T, BoxedError>>)> = {
            let strategies = self.strategies.read();
            strategies
                .iter()
                .filter(|s| s.condition.as_ref().map_or(true, |cond| cond(&original)))
                .map(|s| (s.name.clone(), (s.handler)()))
                .collect()
        };

        if candidates.is_empty() {
            debug!(component = %self.component, "no applicable fallback strategies");
            return Err(original);
        }

        for (name, future) in candidates {
            match future.await {
                Ok(value) => {
                    info!(component = %self.component, strategy = %name, "fallback succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    warn!(
                        component = %self.component,
                        strategy = %name,
                        error = %error,
                        "fallback strategy failed, trying next"
                    );
                }
            }
        }

        warn!(component = %self.component, "all fallback strategies failed");
        Err(original)
    }
}

impl<T, E> std::fmt::Debug for FallbackManager<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackManager")
            .field("component", &self.component)
            .field("strategies", &self.strategies.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct TestError {
        message: String,
        transient: bool,
    }

    fn original() -> TestError {
        TestError { message: "primary down".to_string(), transient: true }
    }

    #[tokio::test]
    async fn test_strategies_tried_in_ascending_priority() {
        let manager: FallbackManager<&str, TestError> = FallbackManager::new("lookup");
        let attempts = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for (name, priority, succeeds) in
            [("tertiary", 30, true), ("primary_cache", 10, false), ("secondary", 20, true)]
        {
            let attempts = Arc::clone(&attempts);
            manager.register(FallbackStrategy::new(name, priority, move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.lock().push(name);
                    if succeeds {
                        Ok(name)
                    } else {
                        Err("cache cold".into())
                    }
                }
            }));
        }

        let result = manager.handle(original()).await;
        assert_eq!(result.unwrap(), "secondary");
        assert_eq!(*attempts.lock(), vec!["primary_cache", "secondary"]);
    }

    #[tokio::test]
    async fn test_condition_skips_without_executing() {
        let manager: FallbackManager<u32, TestError> = FallbackManager::new("lookup");
        let executed = Arc::new(AtomicU32::new(0));

        let executed_clone = Arc::clone(&executed);
        manager.register(
            FallbackStrategy::new("transient_only", 1, move || {
                let executed = Arc::clone(&executed_clone);
                async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .when(|error: &TestError| error.transient),
        );

        let permanent = TestError { message: "bad schema".to_string(), transient: false };
        let result = manager.handle(permanent).await;
        assert_eq!(result.unwrap_err().message, "bad schema");
        assert_eq!(executed.load(Ordering::SeqCst), 0);

        let result = manager.handle(original()).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    /// The original error survives an entirely failed chain, not the last
    /// fallback's error.
    #[tokio::test]
    async fn test_original_error_returned_when_all_fail() {
        let manager: FallbackManager<u32, TestError> = FallbackManager::new("lookup");
        manager.register(FallbackStrategy::new("broken", 1, || async {
            Err("fallback exploded".into())
        }));

        let result = manager.handle(original()).await;
        assert_eq!(result.unwrap_err().message, "primary down");
    }

    #[tokio::test]
    async fn test_empty_chain_returns_original() {
        let manager: FallbackManager<u32, TestError> = FallbackManager::new("lookup");
        assert!(manager.is_empty());

        let result = manager.handle(original()).await;
        assert_eq!(result.unwrap_err().message, "primary down");
    }
}
