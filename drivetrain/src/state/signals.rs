//! Raw observations reported by a driver.

use serde::{Deserialize, Serialize};

/// A snapshot of what the driver can currently see in the external
/// environment.
///
/// Detection rules classify these signals into an
/// [`crate::state::EnvironmentState`]; the signals themselves carry no
/// interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSignals {
    /// Opaque location marker (the concrete driver decides its format).
    pub location: String,
    /// A login prompt is visible.
    pub login_prompt: bool,
    /// A modal dialog or overlay is blocking interaction.
    pub dialog_open: bool,
    /// The environment is mid-transition (loading, animating).
    pub busy: bool,
    /// An error surface is visible.
    pub error_banner: bool,
}

impl StateSignals {
    /// Creates signals at a location with no flags set.
    #[must_use]
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Marks a visible login prompt.
    #[must_use]
    pub fn with_login_prompt(mut self) -> Self {
        self.login_prompt = true;
        self
    }

    /// Marks a blocking dialog.
    #[must_use]
    pub fn with_dialog(mut self) -> Self {
        self.dialog_open = true;
        self
    }

    /// Marks an in-progress transition.
    #[must_use]
    pub fn with_busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Marks a visible error surface.
    #[must_use]
    pub fn with_error_banner(mut self) -> Self {
        self.error_banner = true;
        self
    }
}
