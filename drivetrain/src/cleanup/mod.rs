//! Guaranteed, idempotent resource teardown.
//!
//! One [`EmergencyCleanup`] exists per run and executes exactly once, on
//! every exit path. Failures inside cleanup are collected and logged; they
//! never replace the error that triggered cleanup in the first place.

use crate::driver::DriverHandle;
use crate::core::WorkflowEvent;
use crate::errors::WorkflowError;
use crate::events::EventSink;
use crate::state::StateMachine;
use crate::timeout::DeadlineWatcher;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A registered teardown callback.
pub type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), WorkflowError>> + Send>;

/// What cleanup actually did.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// False when this invocation was a no-op (cleanup already ran).
    pub executed: bool,
    /// Secondary failures encountered during teardown, already logged.
    pub failures: Vec<String>,
}

/// Idempotent, failure-tolerant teardown for one workflow run.
///
/// Responsibilities, in order: abort background watcher tasks, run
/// registered callbacks (LIFO, each under a slice of the budget), reset the
/// environment best-effort on the persist path, release the driver handle,
/// flush the event sink.
pub struct EmergencyCleanup {
    workflow_id: String,
    invoked: AtomicBool,
    driver: Arc<DriverHandle>,
    state_machine: Option<Arc<StateMachine>>,
    watchers: Mutex<Vec<DeadlineWatcher>>,
    callbacks: Mutex<Vec<(String, CleanupFn)>>,
    sink: Arc<dyn EventSink>,
    budget: Duration,
}

impl EmergencyCleanup {
    /// Creates the cleanup guard for one run.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        driver: Arc<DriverHandle>,
        sink: Arc<dyn EventSink>,
        budget: Duration,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            invoked: AtomicBool::new(false),
            driver,
            state_machine: None,
            watchers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            sink,
            budget,
        }
    }

    /// Attaches a state machine for the persist-path environment reset.
    #[must_use]
    pub fn with_state_machine(mut self, machine: Arc<StateMachine>) -> Self {
        self.state_machine = Some(machine);
        self
    }

    /// Registers a background watcher to abort during teardown.
    pub fn register_watcher(&self, watcher: DeadlineWatcher) {
        self.watchers.lock().push(watcher);
    }

    /// Registers a named teardown callback. Callbacks run in LIFO order.
    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        self.callbacks
            .lock()
            .push((name.into(), Box::new(move || callback().boxed())));
    }

    /// Returns whether cleanup has already executed.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.invoked.load(Ordering::SeqCst)
    }

    /// Runs teardown. A second invocation is a no-op.
    ///
    /// `persist` selects the driver close mode: `true` on normal
    /// completion, `false` on failure/timeout/cancellation paths.
    pub async fn run(&self, persist: bool) -> CleanupReport {
        if self
            .invoked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(workflow_id = %self.workflow_id, "cleanup already ran, skipping");
            return CleanupReport::default();
        }

        info!(workflow_id = %self.workflow_id, persist, "emergency cleanup started");
        self.sink
            .try_emit(WorkflowEvent::cleanup_started(&self.workflow_id, persist));

        let mut failures = Vec::new();

        for watcher in self.watchers.lock().drain(..) {
            watcher.abort();
        }

        self.run_callbacks(&mut failures).await;

        // Leave the environment at its entry point before a persisting
        // close, so the next session starts from a known-good baseline.
        if persist {
            if let Some(machine) = &self.state_machine {
                match tokio::time::timeout(self.budget, machine.recover_to_known_good(&self.driver))
                    .await
                {
                    Ok(Ok(state)) => {
                        self.sink.try_emit(WorkflowEvent::recovery(
                            "cleanup",
                            &state.to_string(),
                        ));
                    }
                    Ok(Err(error)) => {
                        warn!(%error, "environment reset failed during cleanup");
                        failures.push(format!("environment reset: {error}"));
                    }
                    Err(_) => {
                        warn!("environment reset timed out during cleanup");
                        failures.push("environment reset: timed out".to_string());
                    }
                }
            }
        }

        match tokio::time::timeout(self.budget, self.driver.close(persist)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(%error, "driver close failed during cleanup");
                failures.push(format!("driver close: {error}"));
            }
            Err(_) => {
                warn!("driver close timed out during cleanup");
                failures.push("driver close: timed out".to_string());
            }
        }

        self.sink
            .try_emit(WorkflowEvent::cleanup_finished(&self.workflow_id, failures.len()));
        self.sink.flush().await;

        info!(
            workflow_id = %self.workflow_id,
            failures = failures.len(),
            "emergency cleanup finished"
        );

        CleanupReport {
            executed: true,
            failures,
        }
    }

    async fn run_callbacks(&self, failures: &mut Vec<String>) {
        let callbacks: Vec<(String, CleanupFn)> = {
            let mut guard = self.callbacks.lock();
            std::mem::take(&mut *guard)
        };

        if callbacks.is_empty() {
            return;
        }

        let per_callback = self
            .budget
            .div_f64(callbacks.len() as f64)
            .max(Duration::from_millis(10));

        for (name, callback) in callbacks.into_iter().rev() {
            match tokio::time::timeout(per_callback, AssertUnwindSafe(callback()).catch_unwind())
                .await
            {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => {
                    warn!(callback = %name, %error, "cleanup callback failed");
                    failures.push(format!("{name}: {error}"));
                }
                Ok(Err(panic)) => {
                    warn!(callback = %name, ?panic, "cleanup callback panicked");
                    failures.push(format!("{name}: panicked"));
                }
                Err(_) => {
                    warn!(callback = %name, "cleanup callback timed out");
                    failures.push(format!("{name}: timed out"));
                }
            }
        }
    }
}

impl std::fmt::Debug for EmergencyCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyCleanup")
            .field("workflow_id", &self.workflow_id)
            .field("has_run", &self.has_run())
            .field("pending_callbacks", &self.callbacks.lock().len())
            .finish()
    }
}
