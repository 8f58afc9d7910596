//! Execution context handed to each stage attempt.

use crate::cancellation::CancellationToken;
use crate::core::WorkflowEvent;
use crate::driver::DriverHandle;
use crate::errors::WorkflowError;
use crate::events::EventSink;
use crate::state::StateMachine;
use std::sync::Arc;
use uuid::Uuid;

/// What a stage sees while executing: the driver, the run's cancellation
/// token, the event sink, and (when configured) the state machine for
/// environment recovery.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct StageContext {
    workflow_id: Uuid,
    stage: String,
    attempt: u32,
    driver: Arc<DriverHandle>,
    token: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
    state_machine: Option<Arc<StateMachine>>,
}

impl StageContext {
    /// Creates a context for one stage attempt.
    #[must_use]
    pub fn new(
        workflow_id: Uuid,
        stage: impl Into<String>,
        attempt: u32,
        driver: Arc<DriverHandle>,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
        state_machine: Option<Arc<StateMachine>>,
    ) -> Self {
        Self {
            workflow_id,
            stage: stage.into(),
            attempt,
            driver,
            token,
            sink,
            state_machine,
        }
    }

    /// The run this stage belongs to.
    #[must_use]
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// The executing stage's name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// The current attempt, 1-indexed.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The driver handle. Exclusively owned by this run; stages never share
    /// it concurrently.
    #[must_use]
    pub fn driver(&self) -> &Arc<DriverHandle> {
        &self.driver
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// The state machine, when the orchestrator was configured with one.
    #[must_use]
    pub fn state_machine(&self) -> Option<&Arc<StateMachine>> {
        self.state_machine.as_ref()
    }

    /// Fails with [`WorkflowError::Cancelled`] if cancellation was
    /// requested. Stages call this at their suspension points.
    pub fn ensure_active(&self) -> Result<(), WorkflowError> {
        self.token.ensure_active()
    }

    /// Emits a custom event without blocking.
    pub fn try_emit(&self, event: WorkflowEvent) {
        self.sink.try_emit(event);
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("workflow_id", &self.workflow_id)
            .field("stage", &self.stage)
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    #[test]
    fn test_context_accessors() {
        let ctx = test_context("upload");
        assert_eq!(ctx.stage_name(), "upload");
        assert_eq!(ctx.attempt(), 1);
        assert!(ctx.state_machine().is_none());
        assert!(ctx.ensure_active().is_ok());
    }

    #[test]
    fn test_ensure_active_after_cancel() {
        let ctx = test_context("upload");
        ctx.token().cancel("stop");
        assert!(ctx.ensure_active().is_err());
    }
}
