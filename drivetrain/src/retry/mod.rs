//! Retry execution with exponential backoff and error classification.

use crate::cancellation::CancellationToken;
use crate::config::RetryPolicy;
use crate::errors::{ErrorClass, WorkflowError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Callback invoked between a failed attempt and the backoff sleep.
///
/// Receives the 1-indexed attempt that just failed and its error. Errors
/// and panics raised here are logged and suppressed; they never interrupt
/// the retry loop.
pub type OnRetry =
    Box<dyn FnMut(u32, WorkflowError) -> BoxFuture<'static, Result<(), WorkflowError>> + Send>;

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct RetryRun<T> {
    /// The final result: first success, or the last error surfaced.
    pub result: Result<T, WorkflowError>,
    /// Attempts actually made (0 if cancelled before the first).
    pub attempts: u32,
}

/// Executes fallible async operations under a [`RetryPolicy`].
///
/// Attempt `k` (1-indexed) is preceded, for `k > 1`, by the policy's
/// backoff delay. Terminal errors, timeouts, and cancellations surface
/// immediately; transient errors are absorbed until `max_attempts` is
/// exhausted, after which the last error surfaces unchanged.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor for the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails terminally, or exhausts the
    /// attempt budget. The backoff sleep observes `token`, so cancellation
    /// never waits out a delay.
    pub async fn execute<T, F, Fut>(
        &self,
        token: &CancellationToken,
        mut op: F,
        mut on_retry: Option<OnRetry>,
    ) -> RetryRun<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                return RetryRun {
                    result: Err(token.to_error()),
                    attempts: attempt,
                };
            }

            attempt += 1;

            match op(attempt).await {
                Ok(value) => {
                    return RetryRun {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    // Timeouts and cancellations have already abandoned the
                    // enclosing scope; no classifier may resurrect them.
                    let fatal = error.is_timeout()
                        || error.is_cancellation()
                        || self.policy.classify(&error) == ErrorClass::Fatal;

                    if fatal {
                        debug!(attempt, %error, "fatal error, not retrying");
                        return RetryRun {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            %error,
                            "retry budget exhausted"
                        );
                        return RetryRun {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }

                    self.notify_retry(&mut on_retry, attempt, &error).await;

                    warn!(attempt, %error, "transient failure, retrying");

                    if let Some(delay) = self.policy.delay_before(attempt + 1) {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = token.cancelled() => {
                                return RetryRun {
                                    result: Err(token.to_error()),
                                    attempts: attempt,
                                };
                            }
                        }
                    }
                }
            }
        }
    }

    async fn notify_retry(&self, on_retry: &mut Option<OnRetry>, attempt: u32, error: &WorkflowError) {
        let Some(callback) = on_retry.as_mut() else {
            return;
        };

        match AssertUnwindSafe(callback(attempt, error.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(callback_error)) => {
                warn!(attempt, %callback_error, "retry callback failed");
            }
            Err(panic) => {
                warn!(attempt, ?panic, "retry callback panicked");
            }
        }
    }
}
