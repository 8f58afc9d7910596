//! # Drivetrain
//!
//! A resilient multi-stage workflow orchestration core for long, flaky,
//! externally-driven operations.
//!
//! Drivetrain runs a declared sequence of stages against an external
//! resource (behind the [`driver::Driver`] trait) with:
//!
//! - **Bounded execution**: per-stage deadlines plus a whole-workflow
//!   deadline enforced by a background watcher task
//! - **Retry with backoff**: transient failures retried under an explicit
//!   policy; terminal failures abort immediately
//! - **Environment recovery**: a finite state machine classifies the
//!   external environment and drives it back to a known-good baseline
//! - **Guaranteed teardown**: idempotent emergency cleanup on every exit
//!   path (success, failure, timeout, or cancellation)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use drivetrain::prelude::*;
//!
//! let workflow = WorkflowBuilder::new()
//!     .with_config(WorkflowConfig::new())
//!     .stage_fn("prepare", |ctx| async move {
//!         ctx.ensure_active()?;
//!         Ok(StageReport::new())
//!     })
//!     .stage_fn("publish", |ctx| async move {
//!         ctx.driver().perform_action(DriverAction::Named("submit".into())).await?;
//!         Ok(StageReport::new())
//!     })
//!     .build()?;
//!
//! let result = workflow.run(DriverHandle::new(Box::new(my_driver))).await;
//! assert!(result.total_success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cleanup;
pub mod config;
pub mod core;
pub mod driver;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod retry;
pub mod stages;
pub mod state;
pub mod testing;
pub mod timeout;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::cleanup::{CleanupReport, EmergencyCleanup};
    pub use crate::config::{
        DeadlinePolicy, JitterStrategy, RecoveryConfig, RetryPolicy, TimeoutConfig,
        WorkflowConfig,
    };
    pub use crate::core::{
        RunStatus, StageOutcome, StageReport, WorkflowEvent, WorkflowExecutionResult,
        WorkflowRun,
    };
    pub use crate::driver::{Driver, DriverAction, DriverHandle, NavigationTarget};
    pub use crate::errors::{ErrorClass, WorkflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::{StageContext, StageOrchestrator, Workflow, WorkflowBuilder};
    pub use crate::retry::{RetryExecutor, RetryRun};
    pub use crate::stages::{FnStage, NoOpStage, Stage};
    pub use crate::state::{DetectionRule, EnvironmentState, StateMachine, StateSignals};
    pub use crate::timeout::{DeadlineWatcher, TimeoutGovernor};
}
