//! Cooperative cancellation token.
//!
//! The engine never preempts running code. It sets this token and expects
//! every suspension point (driver calls, retry sleeps, timeout races) to
//! observe it, either by polling [`CancellationToken::is_cancelled`] or by
//! awaiting [`CancellationToken::cancelled`].

use crate::errors::WorkflowError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// A callback invoked when cancellation is requested.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Token for cooperative cancellation. First cancellation reason wins.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Idempotent: only the first reason is kept. Registered callbacks run
    /// immediately; panics inside them are logged and suppressed. Tasks
    /// parked in [`Self::cancelled`] are woken.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());

            let callbacks = self.callbacks.read();
            for callback in callbacks.iter() {
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback();
                })) {
                    warn!(?panic, "cancellation callback panicked");
                }
            }

            self.notify.notify_waiters();
        }
    }

    /// Registers a callback to run on cancellation.
    ///
    /// If the token is already cancelled, the callback runs immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_cancelled() {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback();
            })) {
                warn!(?panic, "cancellation callback panicked");
            }
        } else {
            self.callbacks.write().push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once cancellation is requested. Resolves immediately if the
    /// token is already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        loop {
            let already_notified = notified.as_mut().enable();
            if already_notified || self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Returns `Err(WorkflowError::Cancelled)` if cancellation was
    /// requested. Stage implementations call this at their suspension
    /// points.
    pub fn ensure_active(&self) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            Err(WorkflowError::cancelled(
                self.reason()
                    .unwrap_or_else(|| "cancellation requested".to_string()),
            ))
        } else {
            Ok(())
        }
    }

    /// Builds the cancellation error for this token's reason.
    #[must_use]
    pub fn to_error(&self) -> WorkflowError {
        WorkflowError::cancelled(
            self.reason()
                .unwrap_or_else(|| "cancellation requested".to_string()),
        )
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
