//! Per-stage outcome records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Data a stage hands back on success.
///
/// The metadata map is carried into the recorded [`StageOutcome`] verbatim;
/// the engine never interprets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageReport {
    /// Free-form result data for audit and downstream collaborators.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Recorded result of one stage's execution. Immutable once appended to a
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: String,
    /// Whether the stage completed successfully.
    pub success: bool,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the final attempt ended.
    pub ended_at: DateTime<Utc>,
    /// Number of attempts made (1-indexed; 1 means no retries).
    pub attempts: u32,
    /// Error message if the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result metadata from the stage's report.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutcome {
    /// Records a successful stage.
    #[must_use]
    pub fn succeeded(
        stage: impl Into<String>,
        started_at: DateTime<Utc>,
        attempts: u32,
        report: StageReport,
    ) -> Self {
        Self {
            stage: stage.into(),
            success: true,
            started_at,
            ended_at: Utc::now(),
            attempts,
            error: None,
            metadata: report.metadata,
        }
    }

    /// Records a failed stage.
    #[must_use]
    pub fn failed(
        stage: impl Into<String>,
        started_at: DateTime<Utc>,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            success: false,
            started_at,
            ended_at: Utc::now(),
            attempts,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Returns the wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64
    }
}
