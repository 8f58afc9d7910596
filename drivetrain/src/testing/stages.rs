//! Stage doubles for exercising the orchestrator.

use crate::core::StageReport;
use crate::errors::WorkflowError;
use crate::orchestrator::StageContext;
use crate::stages::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails transiently a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    name: String,
    fail_times: u32,
    calls: AtomicU32,
}

impl FlakyStage {
    /// Creates a stage that fails `fail_times` attempts before succeeding.
    #[must_use]
    pub fn new(name: impl Into<String>, fail_times: u32) -> Self {
        Self {
            name: name.into(),
            fail_times,
            calls: AtomicU32::new(0),
        }
    }

    /// Total attempts seen so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FlakyStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            Err(WorkflowError::transient(format!(
                "{} flaked on attempt {call}",
                self.name
            )))
        } else {
            Ok(StageReport::new().with_entry("attempt", serde_json::json!(call)))
        }
    }
}

/// Always fails with a fixed error.
#[derive(Debug)]
pub struct AlwaysFailStage {
    name: String,
    error: WorkflowError,
}

impl AlwaysFailStage {
    /// Creates a stage failing terminally with the given message.
    #[must_use]
    pub fn terminal(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: WorkflowError::terminal(message),
        }
    }

    /// Creates a stage failing transiently with the given message.
    #[must_use]
    pub fn transient(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: WorkflowError::transient(message),
        }
    }
}

#[async_trait]
impl Stage for AlwaysFailStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        Err(self.error.clone())
    }
}

/// Sleeps for a fixed duration, then succeeds. The sleep is a suspension
/// point, so deadline and cancellation enforcement get their chance.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a stage that takes `delay` to complete.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        tokio::time::sleep(self.delay).await;
        ctx.ensure_active()?;
        Ok(StageReport::new())
    }
}

/// Appends its name to a shared log, then succeeds. For ordering
/// assertions.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStage {
    /// Creates a recording stage writing into `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        self.log.lock().push(self.name.clone());
        Ok(StageReport::new())
    }
}
