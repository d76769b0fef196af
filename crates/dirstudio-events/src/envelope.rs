//! Event envelope carrying delivery metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DirectoryEvent, EventCategory};

/// Wraps a [`DirectoryEvent`] with the metadata attached at fire time.
///
/// One envelope is created per `fire` call and shared by every listener
/// receiving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this firing.
    pub event_id: Uuid,

    /// Category the event was delivered under.
    pub category: EventCategory,

    /// When the event was fired.
    pub timestamp: DateTime<Utc>,

    /// The event payload.
    pub event: DirectoryEvent,
}

impl EventEnvelope {
    /// Wrap an event, stamping it with a fresh id and the current time.
    pub fn new(event: DirectoryEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            category: event.category(),
            timestamp: Utc::now(),
            event,
        }
    }
}

impl From<DirectoryEvent> for EventEnvelope {
    fn from(event: DirectoryEvent) -> Self {
        Self::new(event)
    }
}
