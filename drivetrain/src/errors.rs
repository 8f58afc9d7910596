//! Error taxonomy for workflow execution.
//!
//! Every failure surfaced by the engine is a [`WorkflowError`]. The split
//! between [`WorkflowError::Transient`] and [`WorkflowError::Terminal`] is
//! what drives retry decisions: transient errors are absorbed by the retry
//! executor up to the policy limit, terminal errors abort the run
//! immediately.

use std::time::Duration;
use thiserror::Error;

/// The main error type for workflow operations.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A locally retryable failure (flaky driver call, transient I/O).
    #[error("transient failure: {0}")]
    Transient(String),

    /// An irrecoverable failure. Bypasses remaining retry attempts.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// A deadline expired. `stage` is `None` for the whole-workflow budget.
    #[error("{} timed out after {elapsed:?} (deadline {deadline:?})", stage_label(stage.as_deref()))]
    Timeout {
        /// The stage that exceeded its deadline, or `None` for the run.
        stage: Option<String>,
        /// The configured deadline.
        deadline: Duration,
        /// Time actually elapsed when the deadline fired.
        elapsed: Duration,
    },

    /// Cancellation was requested externally or by the deadline watcher.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A failure during teardown. Logged only, never the primary failure.
    #[error("cleanup failure: {0}")]
    Cleanup(String),

    /// Configuration was rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn stage_label(stage: Option<&str>) -> String {
    match stage {
        Some(name) => format!("stage '{name}'"),
        None => "workflow".to_string(),
    }
}

impl WorkflowError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a terminal error.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Creates a stage-scoped timeout error.
    #[must_use]
    pub fn stage_timeout(stage: impl Into<String>, deadline: Duration, elapsed: Duration) -> Self {
        Self::Timeout {
            stage: Some(stage.into()),
            deadline,
            elapsed,
        }
    }

    /// Creates a workflow-scoped timeout error.
    #[must_use]
    pub fn workflow_timeout(deadline: Duration, elapsed: Duration) -> Self {
        Self::Timeout {
            stage: None,
            deadline,
            elapsed,
        }
    }

    /// Returns true if the retry executor may attempt this operation again.
    ///
    /// Timeouts and cancellations are never retryable: the enclosing scope
    /// has already been abandoned by the time they surface.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true for either timeout scope.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true for cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Unclassified collaborator errors default to transient: the external
/// environment is assumed flaky unless a stage says otherwise.
impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(format!("{err:#}"))
    }
}

/// Retryability classification used by [`crate::config::RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation may be attempted again.
    Retryable,
    /// No further attempts; surface the error immediately.
    Fatal,
}
