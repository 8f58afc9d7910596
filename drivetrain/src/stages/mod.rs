//! Stage trait and adapters.
//!
//! Stages are the named units of work in a workflow. They receive the
//! driver and run context, do their work against the external environment,
//! and either return a report or raise a classified error.

use crate::core::StageReport;
use crate::errors::WorkflowError;
use crate::orchestrator::StageContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::Debug;
use std::sync::Arc;

/// One named unit of work within a workflow run.
///
/// Implementations must observe cancellation cooperatively: call
/// [`StageContext::ensure_active`] at suspension points, or stop work when
/// the token reports cancellation. The engine signals, it never preempts.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// The stage's name, unique within a workflow.
    fn name(&self) -> &str;

    /// Executes the stage once. The orchestrator handles retries and
    /// deadlines; implementations should fail fast with a classified
    /// error.
    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, WorkflowError>;
}

type StageFn =
    Arc<dyn Fn(StageContext) -> BoxFuture<'static, Result<StageReport, WorkflowError>> + Send + Sync>;

/// A closure-backed stage.
pub struct FnStage {
    name: String,
    func: StageFn,
}

impl FnStage {
    /// Creates a stage from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<StageReport, WorkflowError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx| func(ctx).boxed()),
        }
    }
}

impl Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that does nothing and succeeds. Useful in tests and benches.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageReport, WorkflowError> {
        Ok(StageReport::new())
    }
}
