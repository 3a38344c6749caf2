//! Emergency shutdown with ordered, time-boxed procedures
//!
//! [`EmergencyShutdownSystem`] runs registered procedures sequentially in
//! ascending priority order, each under its own deadline. Execution is
//! best-effort: a failed or timed-out procedure is recorded and the sequence
//! continues. Shutdown is single-shot; a concurrent second initiation
//! returns immediately without running anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};

use crate::error::BoxedError;
use crate::timeout::TimeoutManager;

type ProcedureFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), BoxedError>> + Send + Sync>;

/// A named shutdown step with an execution order and a deadline.
pub struct EmergencyProcedure {
    name: String,
    priority: u8,
    timeout: Duration,
    procedure: ProcedureFn,
}

impl EmergencyProcedure {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        priority: u8,
        timeout: Duration,
        procedure: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxedError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            timeout,
            procedure: Box::new(move || Box::pin(procedure())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result of one procedure during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// What happened during a shutdown run.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: String,
    /// Procedure name with its outcome, in execution order. Empty when the
    /// initiation lost the single-shot race.
    pub outcomes: Vec<(String, ProcedureOutcome)>,
    pub elapsed: Duration,
    /// True when another initiation was already in flight.
    pub already_running: bool,
}

impl ShutdownReport {
    pub fn fully_clean(&self) -> bool {
        !self.already_running
            && self.outcomes.iter().all(|(_, outcome)| *outcome == ProcedureOutcome::Completed)
    }
}

/// Single-shot coordinator for emergency shutdown procedures.
pub struct EmergencyShutdownSystem {
    procedures: Mutex<Vec<EmergencyProcedure>>,
    started: AtomicBool,
    timeouts: TimeoutManager,
}

impl EmergencyShutdownSystem {
    pub fn new() -> Self {
        Self {
            procedures: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            timeouts: TimeoutManager::with_defaults(),
        }
    }

    /// Register a procedure, keeping the list sorted by ascending priority.
    pub fn register(&self, procedure: EmergencyProcedure) {
        let mut procedures = self.procedures.lock();
        procedures.push(procedure);
        procedures.sort_by_key(|p| p.priority);
    }

    pub fn procedure_count(&self) -> usize {
        self.procedures.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run every registered procedure sequentially, each under its deadline.
    ///
    /// Only the first caller runs the sequence; later callers get an empty
    /// report flagged `already_running`.
    #[instrument(skip(self), fields(reason))]
    pub async fn initiate_shutdown(&self, reason: &str) -> ShutdownReport {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(reason, "shutdown already in progress, ignoring duplicate initiation");
            return ShutdownReport {
                reason: reason.to_string(),
                outcomes: Vec::new(),
                elapsed: Duration::ZERO,
                already_running: true,
            };
        }

        error!(reason, "initiating emergency shutdown");
        let started_at = std::time::Instant::now();

        // Snapshot name, deadline, and future under the lock; run after.
        let steps: Vec<(String, Duration, BoxFuture<'static, Result<(), BoxedError>>)> = {
            let procedures = self.procedures.lock();
            procedures.iter().map(|p| (p.name.clone(), p.timeout, (p.procedure)())).collect()
        };

        let mut outcomes = Vec::with_capacity(steps.len());
        for (name, timeout, future) in steps {
            let outcome = match self.timeouts.deadline(&name, Some(timeout), future).await {
                Ok(Ok(())) => {
                    info!(procedure = %name, "shutdown procedure completed");
                    ProcedureOutcome::Completed
                }
                Ok(Err(cause)) => {
                    error!(procedure = %name, error = %cause, "shutdown procedure failed");
                    ProcedureOutcome::Failed(cause.to_string())
                }
                Err(_) => {
                    error!(procedure = %name, ?timeout, "shutdown procedure timed out");
                    ProcedureOutcome::TimedOut
                }
            };
            outcomes.push((name, outcome));
        }

        let report = ShutdownReport {
            reason: reason.to_string(),
            outcomes,
            elapsed: started_at.elapsed(),
            already_running: false,
        };
        info!(
            procedures = report.outcomes.len(),
            clean = report.fully_clean(),
            elapsed = ?report.elapsed,
            "emergency shutdown finished"
        );
        report
    }
}

impl Default for EmergencyShutdownSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EmergencyShutdownSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyShutdownSystem")
            .field("procedures", &self.procedures.lock().len())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}
