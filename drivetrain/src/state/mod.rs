//! Environment state classification and recovery.

mod machine;
mod signals;

pub use machine::{DetectionRule, EnvironmentState, StateMachine};
pub use signals::StateSignals;
