//! Doubles and fixtures for exercising the engine.
//!
//! Kept in the library (not behind `cfg(test)`) so embedders can reuse the
//! scripted driver and stage doubles in their own test suites.

mod drivers;
mod stages;

pub use drivers::ScriptedDriver;
pub use stages::{AlwaysFailStage, FlakyStage, RecordingStage, SlowStage};

use crate::cancellation::CancellationToken;
use crate::driver::DriverHandle;
use crate::events::NoOpEventSink;
use crate::orchestrator::StageContext;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a standalone stage context backed by a blank scripted driver.
#[must_use]
pub fn test_context(stage: &str) -> StageContext {
    StageContext::new(
        Uuid::new_v4(),
        stage,
        1,
        Arc::new(DriverHandle::new(Box::new(ScriptedDriver::new()))),
        Arc::new(CancellationToken::new()),
        Arc::new(NoOpEventSink),
        None,
    )
}
