use async_trait::async_trait;

use crate::events::{EventEnvelope, EventSeverity};

/// Sink for structured runtime events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emit an event. Must not fail the caller.
    async fn emit(&self, event: EventEnvelope);
}

/// Drops every event.
pub struct NoOpEventEmitter;

#[async_trait]
impl EventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: EventEnvelope) {}
}

/// Writes events to the `runtime_events` tracing target.
pub struct TracingEventEmitter;

#[async_trait]
impl EventEmitter for TracingEventEmitter {
    async fn emit(&self, event: EventEnvelope) {
        let payload = event.payload.to_string();
        match event.severity {
            EventSeverity::Debug => tracing::debug!(target: "runtime_events", event_type = %event.event_type, actor = %event.actor, %payload),
            EventSeverity::Info => tracing::info!(target: "runtime_events", event_type = %event.event_type, actor = %event.actor, %payload),
            EventSeverity::Warning => tracing::warn!(target: "runtime_events", event_type = %event.event_type, actor = %event.actor, %payload),
            EventSeverity::Error | EventSeverity::Critical => {
                tracing::error!(target: "runtime_events", event_type = %event.event_type, actor = %event.actor, %payload)
            }
        }
    }
}
