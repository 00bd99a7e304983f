//! Engine event stream
//!
//! Every component reports what it changed through one broadcast channel of
//! [`EngineEventEnvelope`]s. Sending with no subscribers is fine.

use ctrlplane_types::{EngineEvent, EngineEventEnvelope, EventSource};
use tokio::sync::broadcast;

/// Channel capacity for the event stream
const EVENT_CHANNEL_CAPACITY: usize = 16384;

/// Publishes engine events to any number of subscribers
#[derive(Clone)]
pub struct EventAggregator {
    tx: broadcast::Sender<EngineEventEnvelope>,
}

impl EventAggregator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit(&self, source: EventSource, event: EngineEvent) {
        let _ = self.tx.send(EngineEventEnvelope::new(source, event));
    }

    /// Emit with a correlation id, usually the triggering work item
    pub fn emit_correlated(&self, source: EventSource, event: EngineEvent, correlation_id: &str) {
        let envelope = EngineEventEnvelope::new(source, event).with_correlation_id(correlation_id);
        let _ = self.tx.send(envelope);
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}
