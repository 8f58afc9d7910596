//! Stage sequencing and run aggregation.
//!
//! The orchestrator owns the driver handle for the duration of a run,
//! executes declared stages strictly in order, composes deadline and retry
//! enforcement around each one, and guarantees emergency cleanup on every
//! exit path.

mod builder;
mod context;

#[cfg(test)]
mod integration_tests;

pub use builder::{Workflow, WorkflowBuilder};
pub use context::StageContext;

use crate::cancellation::CancellationToken;
use crate::cleanup::EmergencyCleanup;
use crate::config::WorkflowConfig;
use crate::core::{RunStatus, StageOutcome, WorkflowEvent, WorkflowExecutionResult, WorkflowRun};
use crate::driver::DriverHandle;
use crate::errors::WorkflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::retry::{OnRetry, RetryExecutor};
use crate::stages::Stage;
use crate::state::StateMachine;
use crate::timeout::{DeadlineWatcher, OnTimeout, TimeoutGovernor};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Sequences named stages into one workflow run.
///
/// Each stage executes as
/// `TimeoutGovernor::wrap(name, deadline, RetryExecutor::execute(stage))`;
/// the composition is built here, at the call site, so ordering and
/// contracts stay visible. A terminal stage failure aborts the remaining
/// sequence; [`EmergencyCleanup`] runs exactly once before the result is
/// returned, on every path.
pub struct StageOrchestrator {
    config: WorkflowConfig,
    sink: Arc<dyn EventSink>,
    state_machine: Option<Arc<StateMachine>>,
}

impl StageOrchestrator {
    /// Creates an orchestrator, validating the configuration up front.
    pub fn new(config: WorkflowConfig) -> Result<Self, WorkflowError> {
        config.validate()?;
        Ok(Self {
            config,
            sink: Arc::new(NoOpEventSink),
            state_machine: None,
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attaches a state machine, enabling environment recovery on retry
    /// paths and during cleanup.
    #[must_use]
    pub fn with_state_machine(mut self, machine: Arc<StateMachine>) -> Self {
        self.state_machine = Some(machine);
        self
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Runs the declared stages to completion with a fresh cancellation
    /// token.
    pub async fn run(
        &self,
        driver: DriverHandle,
        stages: &[Arc<dyn Stage>],
    ) -> WorkflowExecutionResult {
        self.run_with_token(driver, stages, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs the declared stages under an externally owned cancellation
    /// token, letting a hosting layer request a cooperative abort.
    pub async fn run_with_token(
        &self,
        driver: DriverHandle,
        stages: &[Arc<dyn Stage>],
        token: Arc<CancellationToken>,
    ) -> WorkflowExecutionResult {
        let mut run = WorkflowRun::new();
        let workflow_id = run.id.to_string();
        let driver = Arc::new(driver);

        let mut cleanup = EmergencyCleanup::new(
            &workflow_id,
            driver.clone(),
            self.sink.clone(),
            self.config.cleanup_budget,
        );
        if let Some(machine) = &self.state_machine {
            cleanup = cleanup.with_state_machine(machine.clone());
        }

        let watcher = DeadlineWatcher::spawn(
            workflow_id.clone(),
            self.config.timeout.workflow_deadline,
            token.clone(),
            self.sink.clone(),
        );
        let deadline_expired = watcher.expired_flag();
        cleanup.register_watcher(watcher);

        run.start();
        info!(workflow_id = %workflow_id, stages = stages.len(), "workflow started");
        self.sink
            .try_emit(WorkflowEvent::workflow_started(&workflow_id, stages.len()));

        let budget_started = tokio::time::Instant::now();
        let sequence = self
            .execute_stages(&mut run, &driver, &token, stages, budget_started)
            .await;

        match sequence {
            Ok(()) => run.finish(RunStatus::Succeeded),
            Err(error) => {
                // Cancellation caused by the deadline watcher is reported
                // as a workflow timeout, not a bare cancellation.
                let error = if error.is_cancellation()
                    && deadline_expired.load(std::sync::atomic::Ordering::SeqCst)
                {
                    let timeout = WorkflowError::workflow_timeout(
                        self.config.timeout.workflow_deadline,
                        budget_started.elapsed(),
                    );
                    run.push_error(format!("workflow: {timeout}"));
                    timeout
                } else {
                    error
                };

                if run.errors().is_empty() {
                    run.push_error(format!("workflow: {error}"));
                }
                run.finish(RunStatus::from_error(&error));
            }
        }

        let duration_ms = (Utc::now() - run.started_at).num_milliseconds() as f64;
        info!(
            workflow_id = %workflow_id,
            status = %run.status,
            duration_ms,
            "workflow finished"
        );
        self.sink.try_emit(WorkflowEvent::workflow_finished(
            &workflow_id,
            &run.status.to_string(),
            duration_ms,
        ));

        let persist = run.status == RunStatus::Succeeded;
        let report = cleanup.run(persist).await;
        if !report.failures.is_empty() {
            debug!(
                failures = report.failures.len(),
                "cleanup reported secondary failures"
            );
        }

        run.into_result()
    }

    async fn execute_stages(
        &self,
        run: &mut WorkflowRun,
        driver: &Arc<DriverHandle>,
        token: &Arc<CancellationToken>,
        stages: &[Arc<dyn Stage>],
        budget_started: tokio::time::Instant,
    ) -> Result<(), WorkflowError> {
        let executor = RetryExecutor::new(self.config.retry.clone());
        let workflow_id = run.id;

        for (index, stage) in stages.iter().enumerate() {
            if token.is_cancelled() {
                return Err(token.to_error());
            }

            let name = stage.name().to_string();
            let started_at = Utc::now();
            self.sink.try_emit(WorkflowEvent::stage_started(&name));

            let remaining = self
                .config
                .timeout
                .workflow_deadline
                .saturating_sub(budget_started.elapsed());
            let deadline = self.config.timeout.effective_deadline(&name, remaining);

            let attempts = Arc::new(AtomicU32::new(0));

            let attempt_op = {
                let attempts = attempts.clone();
                let stage = stage.clone();
                let driver = driver.clone();
                let token = token.clone();
                let sink = self.sink.clone();
                let machine = self.state_machine.clone();
                let name = name.clone();
                move |attempt: u32| {
                    attempts.store(attempt, Ordering::SeqCst);
                    let ctx = StageContext::new(
                        workflow_id,
                        name.clone(),
                        attempt,
                        driver.clone(),
                        token.clone(),
                        sink.clone(),
                        machine.clone(),
                    );
                    let stage = stage.clone();
                    async move { stage.execute(&ctx).await }
                }
            };

            let on_retry = self.retry_hook(&name, driver.clone());
            let retrying = async { executor.execute(token, attempt_op, on_retry).await.result };

            let on_timeout: OnTimeout = {
                let sink = self.sink.clone();
                let name = name.clone();
                Box::new(move || {
                    Box::pin(async move {
                        sink.try_emit(WorkflowEvent::stage_timeout(&name, deadline));
                        Ok(())
                    })
                })
            };

            let result =
                TimeoutGovernor::wrap(&name, deadline, token, retrying, Some(on_timeout)).await;

            let attempts_made = attempts.load(Ordering::SeqCst).max(1);

            match result {
                Ok(report) => {
                    let outcome = StageOutcome::succeeded(&name, started_at, attempts_made, report);
                    self.sink.try_emit(WorkflowEvent::stage_completed(
                        &name,
                        attempts_made,
                        outcome.duration_ms(),
                    ));
                    run.record(outcome);
                    // Checkpoint after every successful stage; persistence
                    // is a collaborator concern, the run never blocks on it.
                    self.sink.try_emit(WorkflowEvent::checkpoint(
                        &workflow_id.to_string(),
                        &name,
                        index,
                    ));
                }
                Err(error) => {
                    let message = error.to_string();
                    self.sink
                        .try_emit(WorkflowEvent::stage_failed(&name, attempts_made, &message));
                    run.record(StageOutcome::failed(&name, started_at, attempts_made, &message));
                    run.push_error(format!("{name}: {message}"));
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Between transient attempts: emit the retry event, then (when a state
    /// machine is configured) reset the environment to its known-good
    /// baseline so the next attempt starts clean. Failures here are logged
    /// by the retry executor and never interrupt the loop.
    fn retry_hook(&self, stage: &str, driver: Arc<DriverHandle>) -> Option<OnRetry> {
        let sink = self.sink.clone();
        let machine = self.state_machine.clone();
        let stage = stage.to_string();

        Some(Box::new(move |attempt, error| {
            let sink = sink.clone();
            let machine = machine.clone();
            let driver = driver.clone();
            let stage = stage.clone();
            Box::pin(async move {
                sink.try_emit(WorkflowEvent::stage_retry(&stage, attempt, &error.to_string()));
                if let Some(machine) = machine {
                    let state = machine.recover_to_known_good(&driver).await?;
                    sink.try_emit(WorkflowEvent::recovery("retry", &state.to_string()));
                }
                Ok(())
            })
        }))
    }
}

impl std::fmt::Debug for StageOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageOrchestrator")
            .field("config", &self.config)
            .field("has_state_machine", &self.state_machine.is_some())
            .finish()
    }
}
