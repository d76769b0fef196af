//! # dirstudio-connection
//!
//! Modification pipeline for directory connections.
//!
//! Mutation requests become [`ChangeRecord`]s, wait in a suspendable
//! [`ModificationQueue`], and are committed in order by the
//! [`CommitPipeline`] to a [`DirectorySession`]. Referrals are followed
//! through a [`ReferralResolver`], every attempt is written to the
//! [`AuditLogger`], and outcomes are announced on a
//! [`dirstudio_events::EventBus`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dirstudio_connection::{
//!     CommitPipeline, ConnectionConfig, EntryTarget, ModificationHandler,
//! };
//! use dirstudio_events::EventBus;
//!
//! let config = ConnectionConfig::new("corp", "ldap.example.com")
//!     .with_bind("cn=admin,dc=example,dc=com", "secret");
//! let pipeline = CommitPipeline::from_config(&config, session, resolver, Arc::new(EventBus::new()))?;
//! let handler = ModificationHandler::new(Arc::new(pipeline));
//!
//! handler
//!     .modify_value(&EntryTarget::new("cn=john,dc=example,dc=com"), "mail", 2, "old@example.com", "new@example.com")
//!     .await?;
//! ```

pub mod audit;
pub mod builder;
pub mod config;
pub mod dn;
pub mod error;
pub mod handler;
pub mod ids;
pub mod ldif;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod session;

pub use audit::{
    AuditEntry, AuditLogger, AuditOutcome, AuditSink, FileAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use builder::{ChangeRecordBuilder, EntryTarget};
pub use config::{ConnectionConfig, ModificationLogConfig, ReferralPolicy};
pub use error::{ModificationError, ModificationResult, SessionError, SessionResult};
pub use handler::{ImportSummary, ModificationHandler};
pub use ids::ConnectionId;
pub use ldif::RenderOptions;
pub use pipeline::{CommitFailure, CommitOptions, CommitPipeline, CommitReport};
pub use queue::{ModificationQueue, SuspendCounter};
pub use record::{
    Attribute, AttributeEdit, AttributeValue, Change, ChangeRecord, ChangeType, Control, ModKind,
};
pub use session::{ApplyOutcome, DirectorySession, NoReferralResolver, ReferralResolver};
