//! Workflow run aggregate and the result handed back to callers.

use super::StageOutcome;
use crate::errors::WorkflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Declared but not yet started.
    Pending,
    /// Stages are executing.
    Running,
    /// Every declared stage succeeded.
    Succeeded,
    /// A stage failed terminally.
    Failed,
    /// A stage or the workflow deadline expired.
    TimedOut,
    /// Cancellation was requested before completion.
    Cancelled,
}

impl RunStatus {
    /// Maps a surfaced error to the status it implies for the run.
    #[must_use]
    pub fn from_error(error: &WorkflowError) -> Self {
        match error {
            WorkflowError::Timeout { .. } => Self::TimedOut,
            WorkflowError::Cancelled(_) => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    /// Returns true for any of the settled states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Aggregate state of one end-to-end orchestration execution.
///
/// The outcome list is append-only: recorded outcomes are never replaced or
/// mutated. Exactly one run exists per orchestrator execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique run ID.
    pub id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: RunStatus,
    outcomes: Vec<StageOutcome>,
    errors: Vec<String>,
}

impl WorkflowRun {
    /// Creates a new pending run with a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            status: RunStatus::Pending,
            outcomes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Marks the run as executing.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Utc::now();
    }

    /// Appends a stage outcome. Outcomes are never removed or rewritten.
    pub fn record(&mut self, outcome: StageOutcome) {
        self.outcomes.push(outcome);
    }

    /// Appends a human-readable error message.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Settles the run into a terminal status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
    }

    /// Recorded outcomes, in execution order.
    #[must_use]
    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    /// Accumulated error messages.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Converts the settled run into the caller-facing result.
    #[must_use]
    pub fn into_result(self) -> WorkflowExecutionResult {
        let finished_at = Utc::now();
        let total_success = self.status == RunStatus::Succeeded;
        WorkflowExecutionResult {
            workflow_id: self.id,
            total_success,
            status: self.status,
            stages: self.outcomes,
            errors: self.errors,
            started_at: self.started_at,
            finished_at,
        }
    }
}

impl Default for WorkflowRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-facing summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    /// The run ID.
    pub workflow_id: Uuid,
    /// True only when every declared stage succeeded.
    pub total_success: bool,
    /// Final run status.
    pub status: RunStatus,
    /// Outcomes for every stage that executed, in order.
    pub stages: Vec<StageOutcome>,
    /// Human-readable message for every terminal condition encountered.
    pub errors: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run settled (after cleanup).
    pub finished_at: DateTime<Utc>,
}

impl WorkflowExecutionResult {
    /// Returns the total wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64
    }

    /// Returns the outcome for a named stage, if it executed.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|outcome| outcome.stage == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageReport;
    use std::time::Duration;

    #[test]
    fn test_new_run_is_pending() {
        let run = WorkflowRun::new();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.outcomes().is_empty());
        assert!(run.errors().is_empty());
    }

    #[test]
    fn test_record_appends_in_order() {
        let mut run = WorkflowRun::new();
        run.start();
        run.record(StageOutcome::succeeded("a", Utc::now(), 1, StageReport::new()));
        run.record(StageOutcome::failed("b", Utc::now(), 3, "boom"));

        assert_eq!(run.outcomes().len(), 2);
        assert_eq!(run.outcomes()[0].stage, "a");
        assert_eq!(run.outcomes()[1].stage, "b");
    }

    #[test]
    fn test_status_from_error() {
        assert_eq!(
            RunStatus::from_error(&WorkflowError::transient("x")),
            RunStatus::Failed
        );
        assert_eq!(
            RunStatus::from_error(&WorkflowError::terminal("x")),
            RunStatus::Failed
        );
        assert_eq!(
            RunStatus::from_error(&WorkflowError::workflow_timeout(
                Duration::from_secs(1),
                Duration::from_secs(2)
            )),
            RunStatus::TimedOut
        );
        assert_eq!(
            RunStatus::from_error(&WorkflowError::cancelled("x")),
            RunStatus::Cancelled
        );
    }

    #[test]
    fn test_into_result_success_flag() {
        let mut run = WorkflowRun::new();
        run.start();
        run.record(StageOutcome::succeeded("a", Utc::now(), 1, StageReport::new()));
        run.finish(RunStatus::Succeeded);

        let result = run.into_result();
        assert!(result.total_success);
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.stages.len(), 1);
    }

    #[test]
    fn test_into_result_failure_flag() {
        let mut run = WorkflowRun::new();
        run.start();
        run.push_error("b: terminal failure: nope");
        run.finish(RunStatus::Failed);

        let result = run.into_result();
        assert!(!result.total_success);
        assert_eq!(result.errors, vec!["b: terminal failure: nope".to_string()]);
    }

    #[test]
    fn test_result_stage_lookup() {
        let mut run = WorkflowRun::new();
        run.start();
        run.record(StageOutcome::succeeded("login", Utc::now(), 1, StageReport::new()));
        run.finish(RunStatus::Succeeded);

        let result = run.into_result();
        assert!(result.stage("login").is_some());
        assert!(result.stage("missing").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::TimedOut.is_terminal());
    }
}
