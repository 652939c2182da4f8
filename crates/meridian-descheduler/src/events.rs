use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

pub const REASON_DESCHEDULE_SUCCEEDED: &str = "DescheduleBindingSucceed";
pub const REASON_DESCHEDULE_FAILED: &str = "DescheduleBindingFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// `namespace/name` of the binding.
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink for operator-facing descheduling events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Emits events as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => {
                info!(object=%event.object, reason=%event.reason, "{}", event.message)
            }
            EventType::Warning => {
                warn!(object=%event.object, reason=%event.reason, "{}", event.message)
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record(&self, event: Event) {
        // a panic elsewhere must not lose events
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl<R: EventRecorder + ?Sized> EventRecorder for std::sync::Arc<R> {
    fn record(&self, event: Event) {
        (**self).record(event)
    }
}
