//! Test helpers for bus consumers
//!
//! [`EventRecorder`] collects every event it sees so tests can assert on
//! emission order and payloads; used by this crate's own tests and by the
//! aggregation service's integration suite.

use crate::{EventHandler, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use types::{DomainEvent, EventType};

/// Handler that records every event it receives
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<DomainEvent>>,
}

impl EventRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in arrival order
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one type, in arrival order
    pub fn events_of(&self, event_type: EventType) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Number of recorded events
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Number of recorded events of one type
    pub fn count_of(&self, event_type: EventType) -> usize {
        self.events_of(event_type).len()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
