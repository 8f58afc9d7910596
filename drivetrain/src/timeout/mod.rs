//! Deadline enforcement.
//!
//! [`TimeoutGovernor`] races an operation against its deadline and the run's
//! cancellation token. [`DeadlineWatcher`] is the background task enforcing
//! the whole-workflow budget independently of per-stage deadlines.
//!
//! Enforcement is cooperative: on expiry the governor signals cancellation,
//! fires the timeout callback, and abandons the operation. It never
//! preempts code that refuses to observe the token.

use crate::cancellation::CancellationToken;
use crate::core::WorkflowEvent;
use crate::events::EventSink;
use crate::errors::WorkflowError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback fired when a deadline expires, before the timeout error
/// surfaces. Errors and panics are logged, never propagated.
pub type OnTimeout = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), WorkflowError>> + Send>;

/// Races operations against deadlines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutGovernor;

impl TimeoutGovernor {
    /// Runs `op` under a per-stage deadline.
    ///
    /// On expiry: cancels `token` so the in-flight operation can stop at
    /// its next suspension point, awaits `on_timeout`, then returns
    /// [`WorkflowError::Timeout`] scoped to `stage`. If `token` is
    /// cancelled first (by the deadline watcher or an external caller),
    /// returns the cancellation instead.
    pub async fn wrap<T, F>(
        stage: &str,
        deadline: Duration,
        token: &CancellationToken,
        op: F,
        on_timeout: Option<OnTimeout>,
    ) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        Self::run(Some(stage), deadline, token, op, on_timeout).await
    }

    /// Applies the same contract at whole-run granularity; the resulting
    /// timeout error carries no stage.
    pub async fn wrap_workflow<T, F>(
        deadline: Duration,
        token: &CancellationToken,
        op: F,
    ) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        Self::run(None, deadline, token, op, None).await
    }

    async fn run<T, F>(
        stage: Option<&str>,
        deadline: Duration,
        token: &CancellationToken,
        op: F,
        on_timeout: Option<OnTimeout>,
    ) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        let started = tokio::time::Instant::now();

        tokio::select! {
            result = op => result,
            () = tokio::time::sleep(deadline) => {
                let elapsed = started.elapsed();
                let scope = stage.unwrap_or("workflow");
                warn!(scope, ?deadline, ?elapsed, "deadline expired");

                token.cancel(format!("{scope} deadline of {deadline:?} exceeded"));
                Self::fire_on_timeout(on_timeout, scope).await;

                match stage {
                    Some(name) => Err(WorkflowError::stage_timeout(name, deadline, elapsed)),
                    None => Err(WorkflowError::workflow_timeout(deadline, elapsed)),
                }
            }
            () = token.cancelled() => {
                debug!(scope = stage.unwrap_or("workflow"), "operation abandoned on cancellation");
                Err(token.to_error())
            }
        }
    }

    async fn fire_on_timeout(on_timeout: Option<OnTimeout>, scope: &str) {
        let Some(callback) = on_timeout else {
            return;
        };

        match AssertUnwindSafe(callback()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(scope, %error, "timeout callback failed");
            }
            Err(panic) => {
                warn!(scope, ?panic, "timeout callback panicked");
            }
        }
    }
}

/// Background task enforcing the whole-workflow deadline.
///
/// Sleeps until the budget expires, then cancels the shared token and
/// emits a "workflow.timeout" event. Exits quietly if the run settles (and
/// cancels the token) first. Never touches the driver.
#[derive(Debug)]
pub struct DeadlineWatcher {
    handle: JoinHandle<()>,
    expired: Arc<AtomicBool>,
}

impl DeadlineWatcher {
    /// Spawns the watcher for one run.
    #[must_use]
    pub fn spawn(
        workflow_id: String,
        deadline: Duration,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let expired = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn({
            let expired = expired.clone();
            async move {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => {
                        warn!(workflow_id = %workflow_id, ?deadline, "workflow deadline expired");
                        expired.store(true, Ordering::SeqCst);
                        sink.try_emit(WorkflowEvent::workflow_timeout(&workflow_id, deadline));
                        token.cancel(format!("workflow deadline of {deadline:?} exceeded"));
                    }
                    () = token.cancelled() => {}
                }
            }
        });

        Self { handle, expired }
    }

    /// Returns whether the deadline fired (as opposed to the run settling
    /// first).
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Shared flag readable after the watcher itself has been handed to
    /// cleanup.
    #[must_use]
    pub fn expired_flag(&self) -> Arc<AtomicBool> {
        self.expired.clone()
    }

    /// Aborts the watcher task. Idempotent; called from emergency cleanup.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Returns whether the watcher task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wrap_completes_within_deadline() {
        let token = CancellationToken::new();

        let result = TimeoutGovernor::wrap(
            "fast",
            Duration::from_secs(5),
            &token,
            async { Ok::<_, WorkflowError>(7) },
            None,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_expiry_raises_stage_timeout() {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = fired.clone();
        let on_timeout: OnTimeout = Box::new(move || {
            Box::pin(async move {
                fired_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let result: Result<(), _> = TimeoutGovernor::wrap(
            "slow",
            Duration::from_secs(1),
            &token,
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Some(on_timeout),
        )
        .await;

        let error = result.unwrap_err();
        match error {
            WorkflowError::Timeout { stage, deadline, .. } => {
                assert_eq!(stage.as_deref(), Some("slow"));
                assert_eq!(deadline, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_timeout_error_not_propagated() {
        let token = CancellationToken::new();

        let on_timeout: OnTimeout =
            Box::new(|| Box::pin(async { Err(WorkflowError::transient("cleanup hiccup")) }));

        let result: Result<(), _> = TimeoutGovernor::wrap(
            "slow",
            Duration::from_millis(10),
            &token,
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Some(on_timeout),
        )
        .await;

        // Still the timeout, not the callback's error.
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_timeout_panic_suppressed() {
        let token = CancellationToken::new();

        let on_timeout: OnTimeout = Box::new(|| Box::pin(async { panic!("intentional") }));

        let result: Result<(), _> = TimeoutGovernor::wrap(
            "slow",
            Duration::from_millis(10),
            &token,
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Some(on_timeout),
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_wrap_observes_prior_cancellation() {
        let token = CancellationToken::new();
        token.cancel("external abort");

        let result: Result<(), _> = TimeoutGovernor::wrap(
            "any",
            Duration::from_secs(5),
            &token,
            std::future::pending(),
            None,
        )
        .await;

        assert!(result.unwrap_err().is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_workflow_timeout_has_no_stage() {
        let token = CancellationToken::new();

        let result: Result<(), _> = TimeoutGovernor::wrap_workflow(
            Duration::from_secs(2),
            &token,
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
        )
        .await;

        match result.unwrap_err() {
            WorkflowError::Timeout { stage, .. } => assert!(stage.is_none()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_cancels_token_at_deadline() {
        let token = Arc::new(CancellationToken::new());
        let sink = Arc::new(CollectingEventSink::new());

        let watcher = DeadlineWatcher::spawn(
            "run-1".to_string(),
            Duration::from_secs(1),
            token.clone(),
            sink.clone(),
        );

        token.cancelled().await;

        assert!(token.is_cancelled());
        assert!(token.reason().unwrap().contains("workflow deadline"));
        assert_eq!(sink.events_of_type("workflow.timeout").len(), 1);

        // Watcher exits on its own after firing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(watcher.is_finished());
        assert!(watcher.expired());
    }

    #[tokio::test]
    async fn test_watcher_exits_when_run_settles_first() {
        let token = Arc::new(CancellationToken::new());
        let sink = Arc::new(CollectingEventSink::new());

        let watcher = DeadlineWatcher::spawn(
            "run-1".to_string(),
            Duration::from_secs(600),
            token.clone(),
            sink.clone(),
        );

        token.cancel("run finished");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(watcher.is_finished());
        assert!(!watcher.expired());
        assert!(sink.events_of_type("workflow.timeout").is_empty());
    }
}
