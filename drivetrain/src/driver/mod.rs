//! The external-resource boundary.
//!
//! Everything the engine knows about the outside world goes through the
//! [`Driver`] trait: navigate, observe, act, close. The concrete
//! implementation (UI automation, protocol client) lives outside this
//! crate.

use crate::errors::WorkflowError;
use crate::state::StateSignals;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Where a navigation request should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTarget {
    /// The canonical entry point; recovery paths always go here first.
    EntryPoint,
    /// The authentication surface.
    Login,
    /// A named view the concrete driver knows how to reach.
    Named(String),
}

impl std::fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntryPoint => write!(f, "entry_point"),
            Self::Login => write!(f, "login"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// An action the engine can ask the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverAction {
    /// Dismiss whatever overlay or dialog is currently blocking.
    CloseOverlay,
    /// A named action the concrete driver knows how to perform.
    Named(String),
}

/// Capability set of the external resource.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Navigates to the given target.
    async fn navigate(&self, target: NavigationTarget) -> Result<(), WorkflowError>;

    /// Reports what the environment currently looks like.
    async fn observe(&self) -> Result<StateSignals, WorkflowError>;

    /// Performs an action against the environment.
    async fn perform_action(&self, action: DriverAction) -> Result<(), WorkflowError>;

    /// Releases the underlying resource.
    ///
    /// `persist` signals whether session state (profile, cookies, scratch
    /// data) should survive; failure and timeout paths pass `false`.
    async fn close(&self, persist: bool) -> Result<(), WorkflowError>;
}

/// Lifecycle-managed handle to a [`Driver`].
///
/// Exclusively owned by the orchestrator for the duration of a run. Close
/// is idempotent; all other capabilities fail terminally once the handle is
/// closed.
#[derive(Debug)]
pub struct DriverHandle {
    driver: Box<dyn Driver>,
    closed: AtomicBool,
}

impl DriverHandle {
    /// Wraps a driver in a managed handle.
    #[must_use]
    pub fn new(driver: Box<dyn Driver>) -> Self {
        Self {
            driver,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns whether the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), WorkflowError> {
        if self.is_closed() {
            Err(WorkflowError::terminal("driver handle is closed"))
        } else {
            Ok(())
        }
    }

    /// Navigates to the given target.
    pub async fn navigate(&self, target: NavigationTarget) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        debug!(%target, "driver navigate");
        self.driver.navigate(target).await
    }

    /// Reports what the environment currently looks like.
    pub async fn observe(&self) -> Result<StateSignals, WorkflowError> {
        self.ensure_open()?;
        self.driver.observe().await
    }

    /// Performs an action against the environment.
    pub async fn perform_action(&self, action: DriverAction) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        debug!(?action, "driver action");
        self.driver.perform_action(action).await
    }

    /// Closes the underlying driver. A second call is a no-op.
    pub async fn close(&self, persist: bool) -> Result<(), WorkflowError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        debug!(persist, "driver close");
        self.driver.close(persist).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;

    #[tokio::test]
    async fn test_handle_forwards_while_open() {
        let driver = ScriptedDriver::new().with_signals(vec![StateSignals::at("home")]);
        let handle = DriverHandle::new(Box::new(driver));

        assert!(!handle.is_closed());
        let signals = handle.observe().await.unwrap();
        assert_eq!(signals.location, "home");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let driver = ScriptedDriver::new();
        let handle = DriverHandle::new(Box::new(driver));

        handle.close(true).await.unwrap();
        handle.close(false).await.unwrap();

        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_capabilities_fail_after_close() {
        let driver = ScriptedDriver::new();
        let handle = DriverHandle::new(Box::new(driver));
        handle.close(false).await.unwrap();

        let err = handle.navigate(NavigationTarget::EntryPoint).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Terminal(_)));
        assert!(handle.observe().await.is_err());
        assert!(handle
            .perform_action(DriverAction::CloseOverlay)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_records_persist_flag() {
        let driver = ScriptedDriver::new();
        let calls = driver.calls();
        let handle = DriverHandle::new(Box::new(driver));

        handle.close(true).await.unwrap();

        assert_eq!(calls.lock().last().unwrap(), "close(persist=true)");
    }
}
