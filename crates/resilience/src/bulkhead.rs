//! Bulkhead pattern with priority queueing
//!
//! Bounds concurrent executions of an operation class and queues excess work
//! by priority. The queue rejects synchronously once full, and every queued
//! entry carries a budget measured from enqueue time: an entry that is
//! already past the budget when a slot frees is rejected with a timeout
//! instead of executed. Queued-but-never-run work is charged against the
//! budget deliberately, to bound worst-case latency.
//!
//! Slot ownership is RAII: a granted slot is released when its grant drops,
//! whether the operation finished, panicked, or the queued caller was
//! cancelled before it ever polled the grant.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ResilienceError, ResilienceResult};

/// Configuration for bulkhead behavior.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum operations running at once.
    pub max_concurrent: usize,
    /// Maximum entries waiting for a slot.
    pub queue_size: usize,
    /// Budget for a queued entry, measured from enqueue time.
    pub queue_timeout: Duration,
    /// Priority used by [`Bulkhead::execute`].
    pub default_priority: u8,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            queue_size: 20,
            queue_timeout: Duration::from_secs(30),
            default_priority: 5,
        }
    }
}

impl BulkheadConfig {
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`].
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = timeout;
        self
    }

    pub fn default_priority(mut self, priority: u8) -> Self {
        self.config.default_priority = priority;
        self
    }

    pub fn build(self) -> Result<BulkheadConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time bulkhead metrics.
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    pub running: usize,
    pub queued: usize,
    pub total_executed: u64,
    pub rejected_queue_full: u64,
    pub rejected_timeout: u64,
    pub max_concurrent: usize,
    pub queue_size: usize,
}

impl BulkheadMetrics {
    /// Current slot utilization (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        self.running as f64 / self.max_concurrent as f64
    }
}

struct Waiter<C: Clock> {
    priority: u8,
    enqueued_at: Instant,
    tx: oneshot::Sender<Permission<C>>,
}

struct BulkheadInner<C: Clock> {
    running: usize,
    /// Sorted by priority descending on every enqueue; FIFO within equal
    /// priority is not guaranteed.
    queue: Vec<Waiter<C>>,
    total_executed: u64,
    rejected_queue_full: u64,
    rejected_timeout: u64,
}

struct Shared<C: Clock> {
    name: String,
    config: BulkheadConfig,
    inner: Mutex<BulkheadInner<C>>,
    clock: C,
}

/// Owns one running slot. Dropping it releases the slot and dispatches the
/// next eligible queue entry, so a slot survives neither a panicking
/// operation nor a queued caller that gave up before converting the grant
/// into an execution.
struct SlotGrant<C: Clock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Drop for SlotGrant<C> {
    fn drop(&mut self) {
        self.shared.release_slot();
    }
}

enum Permission<C: Clock> {
    Granted(SlotGrant<C>),
    Expired,
}

impl<C: Clock> Shared<C> {
    /// Free one slot and hand it to the next eligible queue entry.
    ///
    /// Entries past their budget are rejected here, at pop time. The grant
    /// is sent outside the lock: a dead receiver hands the grant straight
    /// back to `Drop`, which re-enters here for the next entry.
    fn release_slot(self: &Arc<Self>) {
        let handoff = {
            let mut inner = self.inner.lock();
            inner.running = inner.running.saturating_sub(1);
            let now = self.clock.now();

            let mut handoff = None;
            while !inner.queue.is_empty() {
                let waiter = inner.queue.remove(0);
                if now.duration_since(waiter.enqueued_at) > self.config.queue_timeout {
                    inner.rejected_timeout += 1;
                    warn!(
                        bulkhead = %self.name,
                        waited = ?now.duration_since(waiter.enqueued_at),
                        "queued entry expired before a slot freed"
                    );
                    let _ = waiter.tx.send(Permission::Expired);
                    continue;
                }
                inner.running += 1;
                handoff = Some(waiter.tx);
                break;
            }
            handoff
        };

        if let Some(tx) = handoff {
            let grant = SlotGrant { shared: Arc::clone(self) };
            if let Err(unclaimed) = tx.send(Permission::Granted(grant)) {
                // Receiver gave up after queueing; dropping the unclaimed
                // grant frees the slot again and dispatches the next entry.
                drop(unclaimed);
            }
        }
    }
}

/// Concurrency limiter with a priority queue for excess work.
pub struct Bulkhead<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl Bulkhead<SystemClock> {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock)
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::with_clock(name, BulkheadConfig::default(), SystemClock)
            .expect("default bulkhead config is valid")
    }
}

impl<C: Clock> Bulkhead<C> {
    /// Create a bulkhead with a custom clock (useful for testing the queue
    /// budget).
    pub fn with_clock(
        name: impl Into<String>,
        config: BulkheadConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                inner: Mutex::new(BulkheadInner {
                    running: 0,
                    queue: Vec::new(),
                    total_executed: 0,
                    rejected_queue_full: 0,
                    rejected_timeout: 0,
                }),
                clock,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Execute `operation` at the configured default priority.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with_priority(operation, self.shared.config.default_priority).await
    }

    /// Execute `operation`, queueing behind higher-priority work when all
    /// slots are busy.
    #[instrument(skip(self, operation), fields(bulkhead = %self.shared.name))]
    pub async fn execute_with_priority<F, Fut, T, E>(
        &self,
        operation: F,
        priority: u8,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let shared = &self.shared;
        let waiting = {
            let mut inner = shared.inner.lock();
            if inner.running < shared.config.max_concurrent {
                inner.running += 1;
                None
            } else if inner.queue.len() >= shared.config.queue_size {
                inner.rejected_queue_full += 1;
                debug!(bulkhead = %shared.name, "queue full, rejecting synchronously");
                return Err(ResilienceError::BulkheadQueueFull {
                    operation: shared.name.clone(),
                    max_concurrent: shared.config.max_concurrent,
                    queue_size: shared.config.queue_size,
                });
            } else {
                let (tx, rx) = oneshot::channel();
                inner.queue.push(Waiter { priority, enqueued_at: shared.clock.now(), tx });
                inner.queue.sort_by(|a, b| b.priority.cmp(&a.priority));
                Some(rx)
            }
        };

        let grant = match waiting {
            None => SlotGrant { shared: Arc::clone(shared) },
            Some(rx) => match rx.await {
                Ok(Permission::Granted(grant)) => grant,
                Ok(Permission::Expired) => {
                    return Err(ResilienceError::OperationTimeout {
                        operation: shared.name.clone(),
                        timeout: shared.config.queue_timeout,
                    });
                }
                // Sender dropped without a verdict; treat as a rejection.
                Err(_) => {
                    return Err(ResilienceError::BulkheadQueueFull {
                        operation: shared.name.clone(),
                        max_concurrent: shared.config.max_concurrent,
                        queue_size: shared.config.queue_size,
                    });
                }
            },
        };

        shared.inner.lock().total_executed += 1;
        let result = operation().await;
        drop(grant);

        result.map_err(|error| ResilienceError::OperationFailed { source: error })
    }

    /// Block (polling) until no work is running or queued. Shutdown only.
    pub async fn drain(&self) {
        loop {
            {
                let inner = self.shared.inner.lock();
                if inner.running == 0 && inner.queue.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        let inner = self.shared.inner.lock();
        BulkheadMetrics {
            running: inner.running,
            queued: inner.queue.len(),
            total_executed: inner.total_executed,
            rejected_queue_full: inner.rejected_queue_full,
            rejected_timeout: inner.rejected_timeout,
            max_concurrent: self.shared.config.max_concurrent,
            queue_size: self.shared.config.queue_size,
        }
    }
}

impl<C: Clock> fmt::Debug for Bulkhead<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Bulkhead")
            .field("name", &self.shared.name)
            .field("max_concurrent", &self.shared.config.max_concurrent)
            .field("running", &inner.running)
            .field("queued", &inner.queue.len())
            .finish()
    }
}
