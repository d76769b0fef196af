//! Directory event categories and payloads.
//!
//! Every event belongs to exactly one [`EventCategory`]. Listeners subscribe
//! per category, so the category is derived from the payload variant rather
//! than supplied separately by the producer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Category under which listeners register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// A new entry was created.
    EntryAdded,
    /// An entry got a new relative name under the same parent.
    EntryRenamed,
    /// An entry was moved under a new parent.
    EntryMoved,
    /// An entry was deleted.
    EntryDeleted,
    /// Many entries changed at once (bulk import).
    BulkModification,
    /// A saved search changed or was re-run.
    SearchUpdated,
    /// A bookmark changed.
    BookmarkUpdated,
    /// A connection was opened, closed or reconfigured.
    ConnectionUpdated,
}

impl EventCategory {
    /// All categories, in declaration order.
    #[must_use]
    pub fn all() -> &'static [EventCategory] {
        &[
            EventCategory::EntryAdded,
            EventCategory::EntryRenamed,
            EventCategory::EntryMoved,
            EventCategory::EntryDeleted,
            EventCategory::BulkModification,
            EventCategory::SearchUpdated,
            EventCategory::BookmarkUpdated,
            EventCategory::ConnectionUpdated,
        ]
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::EntryAdded => "entry-added",
            EventCategory::EntryRenamed => "entry-renamed",
            EventCategory::EntryMoved => "entry-moved",
            EventCategory::EntryDeleted => "entry-deleted",
            EventCategory::BulkModification => "bulk-modification",
            EventCategory::SearchUpdated => "search-updated",
            EventCategory::BookmarkUpdated => "bookmark-updated",
            EventCategory::ConnectionUpdated => "connection-updated",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an event category from its string form.
#[derive(Debug, Clone)]
pub struct ParseEventCategoryError(String);

impl fmt::Display for ParseEventCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event category '{}'", self.0)
    }
}

impl std::error::Error for ParseEventCategoryError {}

impl FromStr for EventCategory {
    type Err = ParseEventCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEventCategoryError(s.to_string()))
    }
}

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Added,
    Removed,
    Renamed,
    Opened,
    Closed,
    ParametersUpdated,
}

/// What happened to a saved search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEventKind {
    Added,
    Removed,
    Renamed,
    Performed,
    ParametersUpdated,
}

/// What happened to a bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkEventKind {
    Added,
    Removed,
    Renamed,
    Updated,
}

/// A directory event with its category-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryEvent {
    EntryAdded {
        connection_id: Uuid,
        dn: String,
    },
    EntryRenamed {
        connection_id: Uuid,
        old_dn: String,
        new_dn: String,
    },
    EntryMoved {
        connection_id: Uuid,
        old_dn: String,
        new_dn: String,
    },
    EntryDeleted {
        connection_id: Uuid,
        dn: String,
    },
    BulkModification {
        connection_id: Uuid,
    },
    SearchUpdated {
        connection_id: Uuid,
        search: String,
        kind: SearchEventKind,
    },
    BookmarkUpdated {
        connection_id: Uuid,
        bookmark: String,
        kind: BookmarkEventKind,
    },
    ConnectionUpdated {
        connection_id: Uuid,
        kind: ConnectionEventKind,
    },
}

impl DirectoryEvent {
    /// The category listeners must subscribe to in order to see this event.
    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            DirectoryEvent::EntryAdded { .. } => EventCategory::EntryAdded,
            DirectoryEvent::EntryRenamed { .. } => EventCategory::EntryRenamed,
            DirectoryEvent::EntryMoved { .. } => EventCategory::EntryMoved,
            DirectoryEvent::EntryDeleted { .. } => EventCategory::EntryDeleted,
            DirectoryEvent::BulkModification { .. } => EventCategory::BulkModification,
            DirectoryEvent::SearchUpdated { .. } => EventCategory::SearchUpdated,
            DirectoryEvent::BookmarkUpdated { .. } => EventCategory::BookmarkUpdated,
            DirectoryEvent::ConnectionUpdated { .. } => EventCategory::ConnectionUpdated,
        }
    }

    /// The connection the event originated from.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        match self {
            DirectoryEvent::EntryAdded { connection_id, .. }
            | DirectoryEvent::EntryRenamed { connection_id, .. }
            | DirectoryEvent::EntryMoved { connection_id, .. }
            | DirectoryEvent::EntryDeleted { connection_id, .. }
            | DirectoryEvent::BulkModification { connection_id }
            | DirectoryEvent::SearchUpdated { connection_id, .. }
            | DirectoryEvent::BookmarkUpdated { connection_id, .. }
            | DirectoryEvent::ConnectionUpdated { connection_id, .. } => *connection_id,
        }
    }
}
