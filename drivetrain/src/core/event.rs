//! Structured observability events emitted during a run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// An event emitted by the engine during workflow execution.
///
/// Events are consumed by [`crate::events::EventSink`] implementations for
/// logging, monitoring, or audit. The core only emits; storage and
/// transport are collaborator concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// The event type (e.g., "stage.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (RFC 3339).
    pub timestamp: String,

    /// The event payload.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl WorkflowEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates a "workflow.started" event.
    #[must_use]
    pub fn workflow_started(workflow_id: &str, stage_count: usize) -> Self {
        Self::new("workflow.started")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("stages", serde_json::json!(stage_count))
    }

    /// Creates a "workflow.finished" event.
    #[must_use]
    pub fn workflow_finished(workflow_id: &str, status: &str, duration_ms: f64) -> Self {
        Self::new("workflow.finished")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("status", serde_json::json!(status))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "workflow.timeout" event.
    #[must_use]
    pub fn workflow_timeout(workflow_id: &str, deadline: Duration) -> Self {
        Self::new("workflow.timeout")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("deadline_ms", serde_json::json!(deadline.as_millis() as u64))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(stage: &str) -> Self {
        Self::new("stage.started").add_data("stage", serde_json::json!(stage))
    }

    /// Creates a "stage.completed" event.
    #[must_use]
    pub fn stage_completed(stage: &str, attempts: u32, duration_ms: f64) -> Self {
        Self::new("stage.completed")
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempts", serde_json::json!(attempts))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.failed" event.
    #[must_use]
    pub fn stage_failed(stage: &str, attempts: u32, error: &str) -> Self {
        Self::new("stage.failed")
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempts", serde_json::json!(attempts))
            .add_data("error", serde_json::json!(error))
    }

    /// Creates a "stage.retry" event for one scheduled retry.
    #[must_use]
    pub fn stage_retry(stage: &str, attempt: u32, error: &str) -> Self {
        Self::new("stage.retry")
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempt", serde_json::json!(attempt))
            .add_data("error", serde_json::json!(error))
    }

    /// Creates a "stage.timeout" event.
    #[must_use]
    pub fn stage_timeout(stage: &str, deadline: Duration) -> Self {
        Self::new("stage.timeout")
            .add_data("stage", serde_json::json!(stage))
            .add_data("deadline_ms", serde_json::json!(deadline.as_millis() as u64))
    }

    /// Creates a "checkpoint.recorded" event marking a durable stage
    /// completion for audit/resumability collaborators.
    #[must_use]
    pub fn checkpoint(workflow_id: &str, stage: &str, index: usize) -> Self {
        Self::new("checkpoint.recorded")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("index", serde_json::json!(index))
    }

    /// Creates a "recovery.performed" event. `trigger` names the path that
    /// asked for recovery ("retry", "cleanup"); `state` is where the
    /// environment landed.
    #[must_use]
    pub fn recovery(trigger: &str, state: &str) -> Self {
        Self::new("recovery.performed")
            .add_data("trigger", serde_json::json!(trigger))
            .add_data("state", serde_json::json!(state))
    }

    /// Creates a "cleanup.started" event.
    #[must_use]
    pub fn cleanup_started(workflow_id: &str, persist: bool) -> Self {
        Self::new("cleanup.started")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("persist", serde_json::json!(persist))
    }

    /// Creates a "cleanup.finished" event.
    #[must_use]
    pub fn cleanup_finished(workflow_id: &str, failures: usize) -> Self {
        Self::new("cleanup.finished")
            .add_data("workflow_id", serde_json::json!(workflow_id))
            .add_data("failures", serde_json::json!(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = WorkflowEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn test_stage_completed_payload() {
        let event = WorkflowEvent::stage_completed("publish", 2, 1534.0);
        assert_eq!(event.event_type, "stage.completed");
        assert_eq!(event.data.get("stage"), Some(&serde_json::json!("publish")));
        assert_eq!(event.data.get("attempts"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_checkpoint_payload() {
        let event = WorkflowEvent::checkpoint("run-1", "upload", 3);
        assert_eq!(event.event_type, "checkpoint.recorded");
        assert_eq!(event.data.get("index"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::stage_failed("login", 3, "bad gateway");
        let json = serde_json::to_string(&event).unwrap();
        let back: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.data.get("error"), Some(&serde_json::json!("bad gateway")));
    }
}
