//! # dirstudio-connector-ldap
//!
//! LDAP transport for the dirstudio modification pipeline.
//!
//! [`LdapSession`] implements [`dirstudio_connection::DirectorySession`] on
//! top of `ldap3`, and [`LdapReferralResolver`] turns referral URLs returned
//! by a server into sessions the pipeline can retry against.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dirstudio_connection::{CommitPipeline, ConnectionConfig};
//! use dirstudio_connector_ldap::{LdapReferralResolver, LdapSession};
//! use dirstudio_events::EventBus;
//!
//! let config = ConnectionConfig::new("corp", "ldap.example.com")
//!     .with_starttls()
//!     .with_bind("cn=admin,dc=example,dc=com", "secret");
//!
//! let session = Arc::new(LdapSession::new(config.clone())?);
//! let resolver = Arc::new(LdapReferralResolver::new(config.clone()));
//! let pipeline = CommitPipeline::from_config(&config, session, resolver, Arc::new(EventBus::new()))?;
//! ```

pub mod resolver;
pub mod session;

pub use resolver::{LdapReferralResolver, ReferralEndpoint};
pub use session::LdapSession;
