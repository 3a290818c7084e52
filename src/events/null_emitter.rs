use async_trait::async_trait;
use std::sync::Mutex;

use crate::core_types::TraceId;

use super::{DomainEvent, EventEmitter};

/// Logs and drops every event. Used by tests and by any deployment that
/// has not wired up a real event bus yet.
#[derive(Default)]
pub struct NullEventEmitter {
    emitted: Mutex<Vec<DomainEvent>>,
}

impl NullEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<DomainEvent> {
        self.emitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventEmitter for NullEventEmitter {
    async fn emit(&self, event: DomainEvent, trace_id: &TraceId) {
        tracing::debug!(
            event_type = event.event_type(),
            event_id = %event.event_id(),
            trace_id = %trace_id,
            "dropping event, no event bus configured"
        );
        self.emitted.lock().unwrap().push(event);
    }
}
