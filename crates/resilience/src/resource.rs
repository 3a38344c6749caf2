//! Typed resource tracking with limits and stale reclamation
//!
//! [`ResourceManager`] tracks live allocations by [`ResourceKind`], enforcing
//! per-kind count limits and a global memory budget. Every tracked resource
//! carries a last-touched timestamp; anything untouched for the staleness
//! window is eligible for reclamation. When an allocation would exceed the
//! memory budget, the manager reclaims up to ten of the oldest stale
//! resources and re-checks once before rejecting. A background task sweeps
//! stale resources on a fixed interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{BoxedError, ErrorCategory, ErrorClassification, ErrorSeverity};

/// Resources eligible for reclamation per budget-pressure retry.
const RECLAIM_BATCH: usize = 10;

/// Kind of tracked resource, each with its own count limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Memory,
    File,
    Network,
    Wasm,
    Agent,
    Database,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Network => "network",
            Self::Wasm => "wasm",
            Self::Agent => "agent",
            Self::Database => "database",
        };
        write!(f, "{name}")
    }
}

/// Errors from resource allocation and cleanup.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource limit exceeded for {kind}: {message}")]
    LimitExceeded { kind: ResourceKind, message: String },

    #[error("cleanup failed for resource {id}: {message}")]
    CleanupFailed { id: Uuid, message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl ErrorClassification for ResourceError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Resource
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::LimitExceeded { .. } => ErrorSeverity::Warning,
            Self::CleanupFailed { .. } | Self::InvalidConfiguration { .. } => ErrorSeverity::Error,
        }
    }
}

/// Limits and timing knobs for the manager.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Per-kind cap on live allocations.
    pub max_per_kind: HashMap<ResourceKind, usize>,
    /// Global budget for the `size_bytes` of live allocations.
    pub memory_budget_bytes: u64,
    /// Untouched-for longer than this makes a resource stale.
    pub stale_after: Duration,
    /// Background sweep interval.
    pub reclaim_interval: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_per_kind: HashMap::from([
                (ResourceKind::Memory, 1024),
                (ResourceKind::File, 256),
                (ResourceKind::Network, 128),
                (ResourceKind::Wasm, 32),
                (ResourceKind::Agent, 64),
                (ResourceKind::Database, 32),
            ]),
            memory_budget_bytes: 512 * 1024 * 1024,
            stale_after: Duration::from_secs(30 * 60),
            reclaim_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl ResourceLimits {
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.memory_budget_bytes == 0 {
            return Err(ResourceError::InvalidConfiguration {
                message: "memory_budget_bytes must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Why an allocation was denied. Only budget pressure is worth reclaiming
/// for; a per-kind count cap will not move until the caller releases.
enum AdmissionDenied {
    CountCap { kind: ResourceKind, current: usize, max: usize },
    OverBudget { used: u64, budget: u64, requested: u64 },
}

impl AdmissionDenied {
    fn into_error(self) -> ResourceError {
        match self {
            Self::CountCap { kind, current, max } => ResourceError::LimitExceeded {
                kind,
                message: format!("{current} of {max} allocations live"),
            },
            Self::OverBudget { used, budget, requested } => ResourceError::LimitExceeded {
                kind: ResourceKind::Memory,
                message: format!("{used} of {budget} budget bytes used, {requested} requested"),
            },
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxedError>> + Send>;

/// A resource registration request.
pub struct ResourceRequest {
    kind: ResourceKind,
    owner: String,
    size_bytes: u64,
    on_release: Option<ReleaseFn>,
}

impl ResourceRequest {
    pub fn new(kind: ResourceKind, owner: impl Into<String>) -> Self {
        Self { kind, owner: owner.into(), size_bytes: 0, on_release: None }
    }

    pub fn size_bytes(mut self, bytes: u64) -> Self {
        self.size_bytes = bytes;
        self
    }

    /// Cleanup to run when the resource is released or reclaimed.
    pub fn on_release<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), BoxedError>> + Send + 'static,
    {
        self.on_release = Some(Box::new(move || Box::pin(callback())));
        self
    }
}

struct TrackedResource {
    kind: ResourceKind,
    owner: String,
    size_bytes: u64,
    allocated_at: Instant,
    last_touched: Instant,
    on_release: Option<ReleaseFn>,
}

struct ResourceIndex {
    entries: HashMap<Uuid, TrackedResource>,
    used_bytes: u64,
    counts: HashMap<ResourceKind, usize>,
    total_allocated: u64,
    total_reclaimed: u64,
}

impl ResourceIndex {
    fn remove(&mut self, id: &Uuid) -> Option<TrackedResource> {
        let entry = self.entries.remove(id)?;
        self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);
        if let Some(count) = self.counts.get_mut(&entry.kind) {
            *count = count.saturating_sub(1);
        }
        Some(entry)
    }

    /// Ids of stale entries, oldest allocation first, up to `limit`.
    fn stale_ids(&self, now: Instant, stale_after: Duration, limit: usize) -> Vec<Uuid> {
        let mut stale: Vec<(Uuid, Instant)> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_touched) > stale_after)
            .map(|(id, e)| (*id, e.allocated_at))
            .collect();
        stale.sort_by_key(|(_, allocated_at)| *allocated_at);
        stale.into_iter().take(limit).map(|(id, _)| id).collect()
    }
}

/// Point-in-time resource metrics.
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    pub live: usize,
    pub used_bytes: u64,
    pub memory_budget_bytes: u64,
    pub counts: HashMap<ResourceKind, usize>,
    pub total_allocated: u64,
    pub total_reclaimed: u64,
}

/// Tracks live resources and reclaims stale ones.
pub struct ResourceManager<C: Clock = SystemClock> {
    limits: ResourceLimits,
    index: Mutex<ResourceIndex>,
    reclaimer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    clock: C,
}

impl ResourceManager<SystemClock> {
    pub fn new(limits: ResourceLimits) -> Result<Self, ResourceError> {
        Self::with_clock(limits, SystemClock)
    }

    pub fn with_defaults() -> Self {
        Self::with_clock(ResourceLimits::default(), SystemClock).expect("default limits are valid")
    }
}

impl<C: Clock> ResourceManager<C> {
    pub fn with_clock(limits: ResourceLimits, clock: C) -> Result<Self, ResourceError> {
        limits.validate()?;
        Ok(Self {
            limits,
            index: Mutex::new(ResourceIndex {
                entries: HashMap::new(),
                used_bytes: 0,
                counts: HashMap::new(),
                total_allocated: 0,
                total_reclaimed: 0,
            }),
            reclaimer: Mutex::new(None),
            clock,
        })
    }

    /// Register a resource, reclaiming stale ones under budget pressure.
    ///
    /// If the memory budget would be exceeded, up to ten of the oldest stale
    /// resources are reclaimed and the limits re-checked once. A per-kind
    /// count cap is not pressure and fails without reclaiming. Still over
    /// means [`ResourceError::LimitExceeded`].
    #[instrument(skip(self, request), fields(kind = %request.kind, owner = %request.owner))]
    pub async fn allocate(&self, request: ResourceRequest) -> Result<Uuid, ResourceError> {
        match self.try_admit(&request) {
            Ok(()) => {}
            Err(denied @ AdmissionDenied::CountCap { .. }) => return Err(denied.into_error()),
            Err(AdmissionDenied::OverBudget { .. }) => {
                let reclaimed = self.reclaim_stale(RECLAIM_BATCH).await;
                debug!(reclaimed, "reclaimed stale resources under memory pressure");
                self.try_admit(&request).map_err(AdmissionDenied::into_error)?;
            }
        }

        let id = Uuid::new_v4();
        let now = self.clock.now();
        let mut index = self.index.lock();
        // Admission re-checked under the lock; concurrent allocations may
        // have consumed the headroom since try_admit.
        Self::check_limits(&self.limits, &index, &request)
            .map_err(AdmissionDenied::into_error)?;
        index.used_bytes += request.size_bytes;
        *index.counts.entry(request.kind).or_insert(0) += 1;
        index.total_allocated += 1;
        index.entries.insert(
            id,
            TrackedResource {
                kind: request.kind,
                owner: request.owner,
                size_bytes: request.size_bytes,
                allocated_at: now,
                last_touched: now,
                on_release: request.on_release,
            },
        );
        Ok(id)
    }

    fn try_admit(&self, request: &ResourceRequest) -> Result<(), AdmissionDenied> {
        let index = self.index.lock();
        Self::check_limits(&self.limits, &index, request)
    }

    fn check_limits(
        limits: &ResourceLimits,
        index: &ResourceIndex,
        request: &ResourceRequest,
    ) -> Result<(), AdmissionDenied> {
        if let Some(max) = limits.max_per_kind.get(&request.kind) {
            let current = index.counts.get(&request.kind).copied().unwrap_or(0);
            if current >= *max {
                return Err(AdmissionDenied::CountCap { kind: request.kind, current, max: *max });
            }
        }
        if index.used_bytes + request.size_bytes > limits.memory_budget_bytes {
            return Err(AdmissionDenied::OverBudget {
                used: index.used_bytes,
                budget: limits.memory_budget_bytes,
                requested: request.size_bytes,
            });
        }
        Ok(())
    }

    /// Refresh a resource's last-touched time. Unknown ids are ignored.
    pub fn touch(&self, id: &Uuid) {
        let mut index = self.index.lock();
        let now = self.clock.now();
        if let Some(entry) = index.entries.get_mut(id) {
            entry.last_touched = now;
        }
    }

    /// Release a resource, running its cleanup callback.
    ///
    /// Bookkeeping is removed before the callback runs, so a failing callback
    /// never leaks the accounting. Unknown ids are a no-op.
    pub async fn release(&self, id: &Uuid) -> Result<(), ResourceError> {
        let entry = self.index.lock().remove(id);
        let Some(entry) = entry else {
            debug!(%id, "release of unknown resource ignored");
            return Ok(());
        };

        if let Some(callback) = entry.on_release {
            callback().await.map_err(|error| ResourceError::CleanupFailed {
                id: *id,
                message: error.to_string(),
            })?;
        }
        Ok(())
    }

    /// Release everything registered by `owner`. Cleanup callbacks run
    /// concurrently; failures are logged, not propagated.
    pub async fn release_all_for_owner(&self, owner: &str) -> usize {
        let removed: Vec<(Uuid, Option<ReleaseFn>)> = {
            let mut index = self.index.lock();
            let ids: Vec<Uuid> = index
                .entries
                .iter()
                .filter(|(_, e)| e.owner == owner)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| index.remove(&id).map(|e| (id, e.on_release)))
                .collect()
        };

        let released = removed.len();
        let cleanups = removed.into_iter().filter_map(|(id, callback)| {
            callback.map(|cb| async move {
                if let Err(error) = cb().await {
                    warn!(%id, error = %error, "cleanup failed during owner release");
                }
            })
        });
        futures::future::join_all(cleanups).await;

        if released > 0 {
            debug!(owner, released, "released resources for owner");
        }
        released
    }

    /// Reclaim up to `limit` stale resources, oldest first. Returns how many
    /// were reclaimed.
    pub async fn reclaim_stale(&self, limit: usize) -> usize {
        let removed: Vec<(Uuid, Option<ReleaseFn>)> = {
            let mut index = self.index.lock();
            let stale = index.stale_ids(self.clock.now(), self.limits.stale_after, limit);
            let removed: Vec<_> = stale
                .into_iter()
                .filter_map(|id| index.remove(&id).map(|e| (id, e.on_release)))
                .collect();
            index.total_reclaimed += removed.len() as u64;
            removed
        };

        let count = removed.len();
        for (id, callback) in removed {
            if let Some(callback) = callback {
                if let Err(error) = callback().await {
                    warn!(%id, error = %error, "cleanup failed during stale reclaim");
                }
            }
        }
        if count > 0 {
            info!(reclaimed = count, "reclaimed stale resources");
        }
        count
    }

    /// Start the background sweep. Idempotent; a second call is ignored.
    pub fn start_reclaimer(self: &Arc<Self>) {
        let mut slot = self.reclaimer.lock();
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.limits.reclaim_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.reclaim_stale(usize::MAX).await;
            }
        }));
    }

    /// Stop the sweep and release every tracked resource. Used on emergency
    /// shutdown; cleanup failures are logged, never propagated.
    pub async fn emergency_cleanup(&self) -> usize {
        if let Some(handle) = self.reclaimer.lock().take() {
            handle.abort();
        }

        let removed: Vec<(Uuid, Option<ReleaseFn>)> = {
            let mut index = self.index.lock();
            let ids: Vec<Uuid> = index.entries.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| index.remove(&id).map(|e| (id, e.on_release)))
                .collect()
        };

        let count = removed.len();
        let cleanups = removed.into_iter().filter_map(|(id, callback)| {
            callback.map(|cb| async move {
                if let Err(error) = cb().await {
                    warn!(%id, error = %error, "cleanup failed during emergency cleanup");
                }
            })
        });
        futures::future::join_all(cleanups).await;

        warn!(released = count, "emergency cleanup released all tracked resources");
        count
    }

    pub fn metrics(&self) -> ResourceMetrics {
        let index = self.index.lock();
        ResourceMetrics {
            live: index.entries.len(),
            used_bytes: index.used_bytes,
            memory_budget_bytes: self.limits.memory_budget_bytes,
            counts: index.counts.clone(),
            total_allocated: index.total_allocated,
            total_reclaimed: index.total_reclaimed,
        }
    }
}

impl<C: Clock> std::fmt::Debug for ResourceManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("ResourceManager")
            .field("live", &index.entries.len())
            .field("used_bytes", &index.used_bytes)
            .finish()
    }
}
