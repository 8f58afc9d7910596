//! Event sink trait and implementations.

use crate::core::WorkflowEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Receives structured workflow events.
///
/// The engine emits stage lifecycle, retry, timeout, recovery, checkpoint,
/// and cleanup events through this trait. Implementations decide storage and
/// transport.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: WorkflowEvent);

    /// Emits an event without blocking the caller.
    ///
    /// Must never fail or panic; errors are logged and suppressed inside the
    /// implementation. The orchestrator uses this on its hot path
    /// (checkpoints in particular) so that a slow sink can never stall a
    /// run.
    fn try_emit(&self, event: WorkflowEvent);

    /// Flushes any buffered events. Called once from emergency cleanup.
    async fn flush(&self) {}
}

/// Discards all events. The default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: WorkflowEvent) {}

    fn try_emit(&self, _event: WorkflowEvent) {}
}

/// Logs every event through the `tracing` framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &WorkflowEvent) {
        match self.level {
            Level::DEBUG => {
                debug!(
                    event_type = %event.event_type,
                    event_data = ?event.data,
                    "event: {}", event.event_type
                );
            }
            _ => {
                info!(
                    event_type = %event.event_type,
                    event_data = ?event.data,
                    "event: {}", event.event_type
                );
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: WorkflowEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: WorkflowEvent) {
        self.log_event(&event);
    }
}

/// Collects events in memory. For tests and short-lived audits.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<WorkflowEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with the given prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<WorkflowEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: WorkflowEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: WorkflowEvent) {
        self.events.write().push(event);
    }
}
