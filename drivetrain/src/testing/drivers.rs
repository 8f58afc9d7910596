//! Scripted driver double.

use crate::driver::{Driver, DriverAction, NavigationTarget};
use crate::errors::WorkflowError;
use crate::state::StateSignals;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A driver that replays a scripted sequence of observations and records
/// every capability call.
///
/// Observations are consumed front to back; once the script is exhausted
/// the last observation repeats. Each capability can be configured to fail
/// with a transient error.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    signals: Mutex<VecDeque<StateSignals>>,
    last_signals: Mutex<Option<StateSignals>>,
    observe_error: Option<String>,
    navigate_error: Option<String>,
    action_error: Option<String>,
    close_error: Option<String>,
    latency: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDriver {
    /// Creates a driver with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the observation sequence.
    #[must_use]
    pub fn with_signals(self, signals: Vec<StateSignals>) -> Self {
        *self.signals.lock() = signals.into();
        self
    }

    /// Makes every `observe` call fail.
    #[must_use]
    pub fn with_observe_error(mut self, message: impl Into<String>) -> Self {
        self.observe_error = Some(message.into());
        self
    }

    /// Makes every `navigate` call fail.
    #[must_use]
    pub fn with_navigate_error(mut self, message: impl Into<String>) -> Self {
        self.navigate_error = Some(message.into());
        self
    }

    /// Makes every `perform_action` call fail.
    #[must_use]
    pub fn with_action_error(mut self, message: impl Into<String>) -> Self {
        self.action_error = Some(message.into());
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub fn with_close_error(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    /// Adds a delay before every capability call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Shared handle to the recorded call log.
    #[must_use]
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().push(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn navigate(&self, target: NavigationTarget) -> Result<(), WorkflowError> {
        self.record(format!("navigate({target})")).await;
        match &self.navigate_error {
            Some(message) => Err(WorkflowError::transient(message.clone())),
            None => Ok(()),
        }
    }

    async fn observe(&self) -> Result<StateSignals, WorkflowError> {
        self.record("observe".to_string()).await;
        if let Some(message) = &self.observe_error {
            return Err(WorkflowError::transient(message.clone()));
        }

        if let Some(next) = self.signals.lock().pop_front() {
            *self.last_signals.lock() = Some(next.clone());
            return Ok(next);
        }

        Ok(self.last_signals.lock().clone().unwrap_or_default())
    }

    async fn perform_action(&self, action: DriverAction) -> Result<(), WorkflowError> {
        let label = match &action {
            DriverAction::CloseOverlay => "close_overlay".to_string(),
            DriverAction::Named(name) => name.clone(),
        };
        self.record(format!("perform_action({label})")).await;

        match &self.action_error {
            Some(message) => Err(WorkflowError::transient(message.clone())),
            None => Ok(()),
        }
    }

    async fn close(&self, persist: bool) -> Result<(), WorkflowError> {
        self.record(format!("close(persist={persist})")).await;
        match &self.close_error {
            Some(message) => Err(WorkflowError::Cleanup(message.clone())),
            None => Ok(()),
        }
    }
}
