//! Configuration surface for the orchestration engine.
//!
//! All tunables live in [`WorkflowConfig`] and are injected into the
//! orchestrator constructor. Nothing in this crate reads process-wide
//! mutable state.

use crate::errors::{ErrorClass, WorkflowError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Classifier deciding whether a failed attempt may be retried.
pub type ClassifyFn = Arc<dyn Fn(&WorkflowError) -> ErrorClass + Send + Sync>;

/// How per-stage deadlines interact with the remaining workflow budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// Bound each stage deadline to `min(stage_deadline, remaining_budget)`.
    ///
    /// A late stage can never "succeed" into an already-expired run.
    #[default]
    Clamp,
    /// Stage and workflow deadlines are independent upper bounds. A stage
    /// may consume its full deadline even when little global budget
    /// remains; the deadline watcher settles the race.
    Independent,
}

/// Deadlines governing stage and workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline applied to each stage unless overridden. Default: 120s.
    pub stage_deadline: Duration,
    /// Per-stage deadline overrides keyed by stage name.
    #[serde(default)]
    pub stage_overrides: HashMap<String, Duration>,
    /// Deadline for the whole run. Default: 600s.
    pub workflow_deadline: Duration,
    /// Stage-vs-workflow budget reconciliation. Default: [`DeadlinePolicy::Clamp`].
    #[serde(default)]
    pub deadline_policy: DeadlinePolicy,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stage_deadline: Duration::from_secs(120),
            stage_overrides: HashMap::new(),
            workflow_deadline: Duration::from_secs(600),
            deadline_policy: DeadlinePolicy::default(),
        }
    }
}

impl TimeoutConfig {
    /// Creates the default timeout configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default per-stage deadline.
    #[must_use]
    pub fn with_stage_deadline(mut self, deadline: Duration) -> Self {
        self.stage_deadline = deadline;
        self
    }

    /// Overrides the deadline for one named stage.
    #[must_use]
    pub fn with_stage_override(mut self, stage: impl Into<String>, deadline: Duration) -> Self {
        self.stage_overrides.insert(stage.into(), deadline);
        self
    }

    /// Sets the whole-workflow deadline.
    #[must_use]
    pub fn with_workflow_deadline(mut self, deadline: Duration) -> Self {
        self.workflow_deadline = deadline;
        self
    }

    /// Sets the deadline reconciliation policy.
    #[must_use]
    pub fn with_deadline_policy(mut self, policy: DeadlinePolicy) -> Self {
        self.deadline_policy = policy;
        self
    }

    /// Returns the configured deadline for a stage.
    #[must_use]
    pub fn deadline_for(&self, stage: &str) -> Duration {
        self.stage_overrides
            .get(stage)
            .copied()
            .unwrap_or(self.stage_deadline)
    }

    /// Returns the deadline to actually enforce for a stage, given the
    /// remaining workflow budget.
    #[must_use]
    pub fn effective_deadline(&self, stage: &str, remaining_budget: Duration) -> Duration {
        let configured = self.deadline_for(stage);
        match self.deadline_policy {
            DeadlinePolicy::Clamp => configured.min(remaining_budget),
            DeadlinePolicy::Independent => configured,
        }
    }

    /// Validates that every deadline is positive.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.stage_deadline.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "stage_deadline must be positive".to_string(),
            ));
        }
        if self.workflow_deadline.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "workflow_deadline must be positive".to_string(),
            ));
        }
        for (stage, deadline) in &self.stage_overrides {
            if deadline.is_zero() {
                return Err(WorkflowError::InvalidConfig(format!(
                    "deadline override for stage '{stage}' must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Jitter applied on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter. Backoff stays deterministic.
    #[default]
    None,
    /// Random from 0 to the computed delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        match self {
            Self::None => delay,
            Self::Full => {
                if millis == 0 {
                    delay
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
                }
            }
            Self::Equal => {
                let half = millis / 2;
                if half == 0 {
                    delay
                } else {
                    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
                }
            }
        }
    }
}

/// Parameters governing retry attempts and backoff.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 2s.
    pub initial_delay: Duration,
    /// Multiplier applied per further attempt. Default: 1.5.
    pub backoff_factor: f64,
    /// Upper bound on any single delay. Default: 60s.
    pub max_delay: Duration,
    /// Jitter strategy. Default: none.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Custom retryability classifier. Falls back to
    /// [`WorkflowError::is_retryable`] when unset.
    #[serde(skip)]
    classifier: Option<ClassifyFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::None,
            classifier: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("custom_classifier", &self.classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Creates the default retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay before the second attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Installs a custom retryability classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&WorkflowError) -> ErrorClass + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Classifies an error for the retry loop.
    #[must_use]
    pub fn classify(&self, error: &WorkflowError) -> ErrorClass {
        if let Some(classifier) = &self.classifier {
            return classifier(error);
        }
        if error.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }

    /// Returns the sleep preceding `attempt` (1-indexed), or `None` for the
    /// first attempt.
    ///
    /// Attempt `k` waits `initial_delay * backoff_factor^(k-2)`, capped at
    /// `max_delay`, before jitter.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }
        let factor = self.backoff_factor.powi(attempt as i32 - 2);
        let raw = self.initial_delay.as_secs_f64() * factor;
        let capped = raw.min(self.max_delay.as_secs_f64());
        Some(self.jitter.apply(Duration::from_secs_f64(capped)))
    }

    /// Validates the policy parameters.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.max_attempts < 1 {
            return Err(WorkflowError::InvalidConfig(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(WorkflowError::InvalidConfig(
                "backoff_factor must be >= 1".to_string(),
            ));
        }
        if self.max_delay.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "max_delay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds on environment recovery performed by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum recovery/re-detection rounds in `ensure_state`. Default: 4.
    pub max_attempts: u32,
    /// Budget for a single state probe. Default: 3s.
    pub probe_timeout: Duration,
    /// Wait applied while the environment reports `Transitioning`. Default: 500ms.
    pub settle_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            probe_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl RecoveryConfig {
    /// Validates the recovery bounds.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.max_attempts < 1 {
            return Err(WorkflowError::InvalidConfig(
                "recovery max_attempts must be >= 1".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "probe_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration, injected into the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Deadline configuration.
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Environment recovery bounds.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Total budget for emergency cleanup. Default: 10s.
    #[serde(default = "default_cleanup_budget")]
    pub cleanup_budget: Duration,
}

fn default_cleanup_budget() -> Duration {
    Duration::from_secs(10)
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            recovery: RecoveryConfig::default(),
            cleanup_budget: default_cleanup_budget(),
        }
    }
}

impl WorkflowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout configuration.
    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the recovery bounds.
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets the cleanup budget.
    #[must_use]
    pub fn with_cleanup_budget(mut self, budget: Duration) -> Self {
        self.cleanup_budget = budget;
        self
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.timeout.validate()?;
        self.retry.validate()?;
        self.recovery.validate()?;
        if self.cleanup_budget.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "cleanup_budget must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
