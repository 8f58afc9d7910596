//! Environment classification and bounded recovery.

use super::StateSignals;
use crate::config::RecoveryConfig;
use crate::driver::{DriverAction, DriverHandle, NavigationTarget};
use crate::errors::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Classified condition of the external environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    /// No rule matched, or the probe failed.
    Unknown,
    /// Authentication is required before anything else.
    LoginRequired,
    /// The canonical entry point.
    Home,
    /// The view a workflow's stages operate on.
    TargetView,
    /// A modal dialog or overlay is blocking interaction.
    DialogOpen,
    /// The environment is mid-transition.
    Transitioning,
    /// The environment shows an error surface.
    Error,
}

impl std::fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::LoginRequired => "login_required",
            Self::Home => "home",
            Self::TargetView => "target_view",
            Self::DialogOpen => "dialog_open",
            Self::Transitioning => "transitioning",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

type MatchFn = Box<dyn Fn(&StateSignals) -> bool + Send + Sync>;

/// One entry in the ordered detection list.
///
/// Rules are evaluated top to bottom; the first match wins. There is no
/// fallthrough heuristic: an unmatched observation is [`EnvironmentState::Unknown`].
pub struct DetectionRule {
    /// The state this rule classifies into.
    pub state: EnvironmentState,
    name: String,
    matches: MatchFn,
}

impl DetectionRule {
    /// Creates a named detection rule.
    pub fn new<F>(state: EnvironmentState, name: impl Into<String>, matches: F) -> Self
    where
        F: Fn(&StateSignals) -> bool + Send + Sync + 'static,
    {
        Self {
            state,
            name: name.into(),
            matches: Box::new(matches),
        }
    }

    /// The rule's name, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for DetectionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionRule")
            .field("state", &self.state)
            .field("name", &self.name)
            .finish()
    }
}

/// Classifies the environment and drives bounded recovery toward a desired
/// state.
///
/// Never loops unbounded: `ensure_state` is capped by
/// [`RecoveryConfig::max_attempts`], `recover_to_known_good` performs one
/// reset pass and one re-detection.
#[derive(Debug)]
pub struct StateMachine {
    rules: Vec<DetectionRule>,
    routes: HashMap<EnvironmentState, NavigationTarget>,
    recovery: RecoveryConfig,
}

impl StateMachine {
    /// Creates a state machine from an explicit rule list.
    #[must_use]
    pub fn new(rules: Vec<DetectionRule>, recovery: RecoveryConfig) -> Self {
        Self {
            rules,
            routes: HashMap::new(),
            recovery,
        }
    }

    /// Creates a state machine with the standard rule ordering.
    ///
    /// Blocking conditions (error, transition, dialog, login) are checked
    /// before stable views, so an overlay on top of the target view still
    /// classifies as [`EnvironmentState::DialogOpen`]. `target_marker` is
    /// the location the concrete driver reports for the target view;
    /// `entry_marker` likewise for the entry point.
    #[must_use]
    pub fn standard(
        entry_marker: impl Into<String>,
        target_marker: impl Into<String>,
        recovery: RecoveryConfig,
    ) -> Self {
        let entry = entry_marker.into();
        let target = target_marker.into();

        let rules = vec![
            DetectionRule::new(EnvironmentState::Error, "error_banner", |signals| {
                signals.error_banner
            }),
            DetectionRule::new(EnvironmentState::Transitioning, "busy", |signals| {
                signals.busy
            }),
            DetectionRule::new(EnvironmentState::DialogOpen, "dialog_open", |signals| {
                signals.dialog_open
            }),
            DetectionRule::new(EnvironmentState::LoginRequired, "login_prompt", |signals| {
                signals.login_prompt
            }),
            DetectionRule::new(EnvironmentState::TargetView, "target_location", {
                let target = target.clone();
                move |signals| signals.location == target
            }),
            DetectionRule::new(EnvironmentState::Home, "entry_location", {
                let entry = entry.clone();
                move |signals| signals.location == entry
            }),
        ];

        let mut routes = HashMap::new();
        routes.insert(EnvironmentState::Home, NavigationTarget::EntryPoint);
        routes.insert(EnvironmentState::LoginRequired, NavigationTarget::Login);
        routes.insert(
            EnvironmentState::TargetView,
            NavigationTarget::Named(target),
        );

        Self {
            rules,
            routes,
            recovery,
        }
    }

    /// Overrides the navigation route used to reach a desired state.
    #[must_use]
    pub fn with_route(mut self, state: EnvironmentState, target: NavigationTarget) -> Self {
        self.routes.insert(state, target);
        self
    }

    /// Classifies raw signals without touching the driver.
    #[must_use]
    pub fn classify(&self, signals: &StateSignals) -> EnvironmentState {
        for rule in &self.rules {
            if (rule.matches)(signals) {
                debug!(rule = rule.name(), state = %rule.state, "detection rule matched");
                return rule.state;
            }
        }
        EnvironmentState::Unknown
    }

    /// Probes the driver and classifies the result.
    ///
    /// Probe failures and probe timeouts both classify as
    /// [`EnvironmentState::Unknown`]; detection itself never fails the run.
    pub async fn detect(&self, driver: &DriverHandle) -> EnvironmentState {
        match tokio::time::timeout(self.recovery.probe_timeout, driver.observe()).await {
            Ok(Ok(signals)) => self.classify(&signals),
            Ok(Err(error)) => {
                warn!(%error, "state probe failed");
                EnvironmentState::Unknown
            }
            Err(_) => {
                warn!(
                    probe_timeout_ms = self.recovery.probe_timeout.as_millis() as u64,
                    "state probe timed out"
                );
                EnvironmentState::Unknown
            }
        }
    }

    /// Drives the environment toward `desired` within the recovery budget.
    ///
    /// Returns whether `desired` was reached. Recovery actions are
    /// targeted: a blocking dialog is closed, a transition is waited out,
    /// an unknown or errored environment is reset to the entry point, and
    /// a wrong-but-stable view is navigated away from.
    pub async fn ensure_state(
        &self,
        driver: &DriverHandle,
        desired: EnvironmentState,
    ) -> Result<bool, WorkflowError> {
        for attempt in 1..=self.recovery.max_attempts {
            let current = self.detect(driver).await;
            if current == desired {
                return Ok(true);
            }

            debug!(
                attempt,
                current = %current,
                desired = %desired,
                "environment not in desired state, recovering"
            );

            if attempt < self.recovery.max_attempts {
                self.recovery_step(driver, current, desired).await?;
            }
        }

        warn!(
            desired = %desired,
            budget = self.recovery.max_attempts,
            "recovery budget exhausted"
        );
        Ok(false)
    }

    /// Circuit-breaker reset used when the environment state is unknown or
    /// errored: dismiss known overlays best-effort, return to the entry
    /// point, re-detect once. Never loops.
    pub async fn recover_to_known_good(
        &self,
        driver: &DriverHandle,
    ) -> Result<EnvironmentState, WorkflowError> {
        self.reset_to_entry(driver).await?;
        let state = self.detect(driver).await;
        info!(state = %state, "recovered to known-good baseline");
        Ok(state)
    }

    async fn recovery_step(
        &self,
        driver: &DriverHandle,
        current: EnvironmentState,
        desired: EnvironmentState,
    ) -> Result<(), WorkflowError> {
        match current {
            EnvironmentState::DialogOpen => {
                driver.perform_action(DriverAction::CloseOverlay).await?;
            }
            EnvironmentState::Transitioning => {
                tokio::time::sleep(self.recovery.settle_delay).await;
            }
            EnvironmentState::Unknown | EnvironmentState::Error => {
                self.reset_to_entry(driver).await?;
            }
            _ => {
                driver.navigate(self.route_for(desired)).await?;
            }
        }
        Ok(())
    }

    async fn reset_to_entry(&self, driver: &DriverHandle) -> Result<(), WorkflowError> {
        if let Err(error) = driver.perform_action(DriverAction::CloseOverlay).await {
            debug!(%error, "overlay dismissal failed during reset, continuing");
        }
        driver.navigate(NavigationTarget::EntryPoint).await
    }

    fn route_for(&self, desired: EnvironmentState) -> NavigationTarget {
        self.routes
            .get(&desired)
            .cloned()
            .unwrap_or(NavigationTarget::EntryPoint)
    }
}
