//! Fluent workflow assembly with up-front validation.

use super::StageOrchestrator;
use crate::config::WorkflowConfig;
use crate::core::{StageReport, WorkflowExecutionResult};
use crate::driver::DriverHandle;
use crate::errors::WorkflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::orchestrator::StageContext;
use crate::stages::{FnStage, Stage};
use crate::state::StateMachine;
use std::collections::HashSet;
use std::sync::Arc;

/// Builds a [`Workflow`]: config, sink, state machine, and the ordered
/// stage list, validated together.
pub struct WorkflowBuilder {
    config: WorkflowConfig,
    sink: Arc<dyn EventSink>,
    state_machine: Option<Arc<StateMachine>>,
    stages: Vec<Arc<dyn Stage>>,
}

impl WorkflowBuilder {
    /// Creates a builder with default configuration and a no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: WorkflowConfig::new(),
            sink: Arc::new(NoOpEventSink),
            state_machine: None,
            stages: Vec::new(),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attaches a state machine for recovery paths.
    #[must_use]
    pub fn with_state_machine(mut self, machine: Arc<StateMachine>) -> Self {
        self.state_machine = Some(machine);
        self
    }

    /// Appends a stage. Stages execute in the order they are added.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends a closure-backed stage.
    #[must_use]
    pub fn stage_fn<F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<StageReport, WorkflowError>> + Send + 'static,
    {
        self.stage(FnStage::new(name, func))
    }

    /// Validates and assembles the workflow.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.stages.is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "workflow declares no stages".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name().to_string()) {
                return Err(WorkflowError::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }

        let mut orchestrator = StageOrchestrator::new(self.config)?.with_sink(self.sink);
        if let Some(machine) = self.state_machine {
            orchestrator = orchestrator.with_state_machine(machine);
        }

        Ok(Workflow {
            orchestrator,
            stages: self.stages,
        })
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// A validated, ready-to-run workflow.
#[derive(Debug)]
pub struct Workflow {
    orchestrator: StageOrchestrator,
    stages: Vec<Arc<dyn Stage>>,
}

impl Workflow {
    /// Runs the workflow, consuming exclusive ownership of the driver
    /// handle for the duration.
    pub async fn run(&self, driver: DriverHandle) -> WorkflowExecutionResult {
        self.orchestrator.run(driver, &self.stages).await
    }

    /// Declared stage names, in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// The orchestrator backing this workflow.
    #[must_use]
    pub fn orchestrator(&self) -> &StageOrchestrator {
        &self.orchestrator
    }
}
