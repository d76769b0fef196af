//! # dirstudio-events
//!
//! In-process event bus for directory changes.
//!
//! Producers fire [`DirectoryEvent`]s; listeners register per
//! [`EventCategory`] and choose where their callback runs through a
//! [`Dispatcher`].
//!
//! ## Features
//!
//! - **Category routing**: one registry per bus, keyed by category
//! - **Execution context**: inline delivery or hand-off to a designated thread
//! - **Per-thread suppression**: silence notifications from one thread during
//!   bulk work while other threads keep firing
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dirstudio_events::{
//!     DirectoryEvent, EventBus, EventCategory, EventEnvelope, EventListener, InlineDispatcher,
//! };
//! use uuid::Uuid;
//!
//! let bus = EventBus::new();
//! let listener: Arc<dyn EventListener> = Arc::new(|envelope: &EventEnvelope| {
//!     println!("{} at {}", envelope.category, envelope.timestamp);
//! });
//! bus.register(EventCategory::EntryAdded, listener, InlineDispatcher::shared());
//!
//! bus.fire(DirectoryEvent::EntryAdded {
//!     connection_id: Uuid::new_v4(),
//!     dn: "cn=john,ou=people,dc=example,dc=com".to_string(),
//! });
//! ```

pub mod bus;
pub mod dispatcher;
pub mod envelope;
pub mod event;

pub use bus::{EventBus, SuspendGuard};
pub use dispatcher::{
    AffinityDispatcher, AffinityLoop, Dispatcher, EventListener, InlineDispatcher,
};
pub use envelope::EventEnvelope;
pub use event::{
    BookmarkEventKind, ConnectionEventKind, DirectoryEvent, EventCategory,
    ParseEventCategoryError, SearchEventKind,
};
