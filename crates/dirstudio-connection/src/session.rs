//! Directory session and referral resolver seams.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use crate::ids::ConnectionId;
use crate::record::ChangeRecord;

/// Result of sending one change record to a session.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The server applied the change.
    Ok,
    /// The target is held elsewhere; the server offered these endpoints.
    Referral(Vec<String>),
    /// The change failed.
    Error(SessionError),
}

impl ApplyOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ApplyOutcome::Ok)
    }
}

impl From<SessionResult<()>> for ApplyOutcome {
    fn from(result: SessionResult<()>) -> Self {
        match result {
            Ok(()) => ApplyOutcome::Ok,
            Err(e) => ApplyOutcome::Error(e),
        }
    }
}

/// A live (or openable) session to one directory server.
///
/// Every method may block on network I/O.
#[async_trait]
pub trait DirectorySession: Send + Sync {
    /// The configured connection this session belongs to.
    fn connection_id(&self) -> ConnectionId;

    /// Server address as written to the audit log, e.g. `ldap://host:389`.
    fn endpoint(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Establish the transport connection.
    async fn open(&self) -> SessionResult<()>;

    /// Authenticate with the configured credentials.
    async fn bind(&self) -> SessionResult<()>;

    /// Send one change record.
    async fn apply_change(&self, record: &ChangeRecord) -> ApplyOutcome;

    /// Release the connection.
    async fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}

/// Maps a referral endpoint to a session able to serve it.
///
/// Implementations may consult a cache, build a fresh session, or ask an
/// operator. `None` means the endpoint is not usable.
#[async_trait]
pub trait ReferralResolver: Send + Sync {
    async fn resolve(&self, endpoint: &str) -> Option<Arc<dyn DirectorySession>>;
}

/// Resolver that never yields a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferralResolver;

#[async_trait]
impl ReferralResolver for NoReferralResolver {
    async fn resolve(&self, _endpoint: &str) -> Option<Arc<dyn DirectorySession>> {
        None
    }
}
