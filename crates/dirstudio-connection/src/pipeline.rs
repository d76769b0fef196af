//! Commit pipeline: drains the modification queue into a directory session.
//!
//! A commit pass takes every queued record at once and sends them strictly in
//! enqueue order. Referrals are followed through the [`ReferralResolver`]
//! when the policy allows it. Each attempted record yields exactly one audit
//! entry, and domain events are fired only after a record's final outcome is
//! known.

use std::sync::Arc;

use dirstudio_events::{ConnectionEventKind, DirectoryEvent, EventBus};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::config::{ConnectionConfig, ReferralPolicy};
use crate::error::{ModificationError, ModificationResult, SessionError};
use crate::ids::ConnectionId;
use crate::queue::ModificationQueue;
use crate::record::{Change, ChangeRecord};
use crate::session::{ApplyOutcome, DirectorySession, NoReferralResolver, ReferralResolver};

/// Per-pass behaviour chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Abandon the rest of the pass after the first failure.
    pub stop_on_error: bool,
    /// Fire per-record domain events on success.
    pub notify: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            notify: true,
        }
    }
}

impl CommitOptions {
    /// Continue past failures and stay silent; used by bulk operations.
    pub fn bulk(continue_on_error: bool) -> Self {
        Self {
            stop_on_error: !continue_on_error,
            notify: false,
        }
    }
}

/// A record that failed during a pass.
#[derive(Debug)]
pub struct CommitFailure {
    pub dn: String,
    pub sequence: Option<u64>,
    pub error: ModificationError,
}

/// What a commit pass did.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Records the directory accepted.
    pub applied: usize,
    /// Records that failed, in order.
    pub failures: Vec<CommitFailure>,
    /// Drained records never attempted because the pass stopped early.
    pub skipped: usize,
    /// Records left queued because the queue is suspended.
    pub deferred: usize,
    /// The pass stopped on the cancellation token.
    pub canceled: bool,
    /// The pass stopped on a failure under `stop_on_error`.
    pub aborted: bool,
}

impl CommitReport {
    fn deferred(deferred: usize) -> Self {
        Self {
            deferred,
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.applied + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.canceled
    }

    /// Turn an aborted or canceled pass into the caller-facing error.
    ///
    /// A pass that continued past failures stays `Ok`; inspect
    /// [`CommitReport::failures`] for those.
    pub fn into_result(mut self) -> ModificationResult<Self> {
        if self.aborted {
            if let Some(failure) = self.failures.pop() {
                return Err(failure.error);
            }
        }
        if self.canceled {
            return Err(ModificationError::Canceled);
        }
        Ok(self)
    }
}

/// Why one record could not be applied, and where it was last tried.
struct AttemptFailure {
    endpoint: String,
    error: ModificationError,
}

/// Drains one session's modification queue and commits it.
pub struct CommitPipeline {
    session: Arc<dyn DirectorySession>,
    resolver: Arc<dyn ReferralResolver>,
    events: Arc<EventBus>,
    audit: AuditLogger,
    queue: ModificationQueue,
    referral_policy: ReferralPolicy,
    max_referral_hops: Option<u32>,
    commit_lock: Mutex<()>,
}

impl CommitPipeline {
    /// A pipeline following referrals through no resolver, with default
    /// policy.
    pub fn new(session: Arc<dyn DirectorySession>, events: Arc<EventBus>, audit: AuditLogger) -> Self {
        Self {
            session,
            resolver: Arc::new(NoReferralResolver),
            events,
            audit,
            queue: ModificationQueue::new(),
            referral_policy: ReferralPolicy::default(),
            max_referral_hops: Some(10),
            commit_lock: Mutex::new(()),
        }
    }

    /// Build from connection configuration, including the audit log.
    pub fn from_config(
        config: &ConnectionConfig,
        session: Arc<dyn DirectorySession>,
        resolver: Arc<dyn ReferralResolver>,
        events: Arc<EventBus>,
    ) -> ModificationResult<Self> {
        config.validate()?;
        let audit = AuditLogger::from_config(&config.modification_log, config.id)?;
        Ok(Self::new(session, events, audit)
            .with_resolver(resolver)
            .with_referral_policy(config.referral_policy, config.max_referral_hops))
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferralResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_referral_policy(mut self, policy: ReferralPolicy, max_hops: Option<u32>) -> Self {
        self.referral_policy = policy;
        self.max_referral_hops = max_hops;
        self
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.session.connection_id()
    }

    pub fn session(&self) -> &Arc<dyn DirectorySession> {
        &self.session
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn queue(&self) -> &ModificationQueue {
        &self.queue
    }

    /// Validate and queue a record without committing.
    pub fn push(&self, record: ChangeRecord) -> ModificationResult<u64> {
        record.validate()?;
        let sequence = self.queue.push(record);
        debug!(connection_id = %self.connection_id(), sequence, "Queued change record");
        Ok(sequence)
    }

    /// Queue a record, then commit unless the queue is suspended.
    pub async fn enqueue(
        &self,
        record: ChangeRecord,
        options: CommitOptions,
        cancel: &CancellationToken,
    ) -> ModificationResult<CommitReport> {
        self.push(record)?;
        self.commit(options, cancel).await.into_result()
    }

    /// Defer commits until the matching [`CommitPipeline::resume`].
    pub fn suspend(&self) {
        let depth = self.queue.suspend();
        debug!(connection_id = %self.connection_id(), depth, "Suspended commits");
    }

    /// Undo one [`CommitPipeline::suspend`]; at depth zero the queue is
    /// committed.
    pub async fn resume(
        &self,
        options: CommitOptions,
        cancel: &CancellationToken,
    ) -> ModificationResult<CommitReport> {
        let depth = self.queue.resume();
        debug!(connection_id = %self.connection_id(), depth, "Resumed commits");
        if depth > 0 {
            return Ok(CommitReport::deferred(self.queue.len()));
        }
        self.commit(options, cancel).await.into_result()
    }

    /// Run one commit pass. A no-op while suspended.
    ///
    /// Passes for one pipeline never overlap; records queued while a pass
    /// runs are picked up by the next one.
    #[instrument(skip(self, cancel), fields(connection_id = %self.connection_id()))]
    pub async fn commit(&self, options: CommitOptions, cancel: &CancellationToken) -> CommitReport {
        if self.queue.is_suspended() {
            return CommitReport::deferred(self.queue.len());
        }

        let _pass = self.commit_lock.lock().await;
        let records = self.queue.drain();
        if records.is_empty() {
            if self.queue.is_suspended() {
                return CommitReport::deferred(self.queue.len());
            }
            return CommitReport::default();
        }
        debug!(records = records.len(), "Starting commit pass");

        let total = records.len();
        let mut report = CommitReport::default();
        for (index, record) in records.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.canceled = true;
                report.skipped = total - index;
                info!(skipped = report.skipped, "Commit pass canceled");
                break;
            }

            match self.apply_with_referrals(&record).await {
                Ok(endpoint) => {
                    self.audit
                        .record_success(self.connection_id(), &endpoint, &record);
                    report.applied += 1;
                    if options.notify {
                        self.notify(&record);
                    }
                }
                Err(failure) => {
                    warn!(
                        dn = %record.dn(),
                        sequence = ?record.sequence(),
                        endpoint = %failure.endpoint,
                        error = %failure.error,
                        "Change record failed"
                    );
                    self.audit.record_failure(
                        self.connection_id(),
                        &failure.endpoint,
                        &record,
                        &failure.error.to_string(),
                    );
                    report.failures.push(CommitFailure {
                        dn: record.dn().to_string(),
                        sequence: record.sequence(),
                        error: failure.error,
                    });
                    if options.stop_on_error {
                        report.aborted = true;
                        report.skipped = total - index - 1;
                        if report.skipped > 0 {
                            warn!(skipped = report.skipped, "Dropping unattempted change records");
                        }
                        break;
                    }
                }
            }
        }

        debug!(
            applied = report.applied,
            failed = report.failures.len(),
            skipped = report.skipped,
            "Commit pass finished"
        );
        report
    }

    /// Send one record, following referrals. Returns the endpoint that
    /// accepted it.
    async fn apply_with_referrals(&self, record: &ChangeRecord) -> Result<String, AttemptFailure> {
        let mut session = self.session.clone();
        let mut hops: u32 = 0;
        loop {
            let endpoints = match session.apply_change(record).await {
                ApplyOutcome::Ok => return Ok(session.endpoint()),
                ApplyOutcome::Error(e) => {
                    return Err(AttemptFailure {
                        endpoint: session.endpoint(),
                        error: e.into(),
                    })
                }
                ApplyOutcome::Referral(endpoints) => endpoints,
            };

            debug!(dn = %record.dn(), ?endpoints, hops, "Referral returned");
            if self.referral_policy == ReferralPolicy::Ignore {
                return Err(AttemptFailure {
                    endpoint: session.endpoint(),
                    error: SessionError::Referral { endpoints }.into(),
                });
            }
            if let Some(max) = self.max_referral_hops {
                if hops >= max {
                    return Err(AttemptFailure {
                        endpoint: session.endpoint(),
                        error: ModificationError::referral_unresolved(
                            endpoints,
                            format!("exceeded {max} referral hops"),
                        ),
                    });
                }
            }
            hops += 1;

            session = match self.follow(&endpoints).await {
                Ok(next) => next,
                Err(error) => {
                    return Err(AttemptFailure {
                        endpoint: session.endpoint(),
                        error,
                    })
                }
            };
        }
    }

    /// Resolve the first usable endpoint, opening and binding its session if
    /// needed.
    async fn follow(&self, endpoints: &[String]) -> ModificationResult<Arc<dyn DirectorySession>> {
        for endpoint in endpoints {
            let Some(session) = self.resolver.resolve(endpoint).await else {
                debug!(%endpoint, "Referral endpoint not resolvable, skipping");
                continue;
            };

            if !session.is_connected() {
                session.open().await?;
                session.bind().await?;
                info!(%endpoint, connection_id = %session.connection_id(), "Opened referral connection");
                self.events.fire(DirectoryEvent::ConnectionUpdated {
                    connection_id: session.connection_id().into(),
                    kind: ConnectionEventKind::Opened,
                });
            }
            return Ok(session);
        }
        Err(ModificationError::referral_unresolved(
            endpoints.to_vec(),
            "no session for any endpoint",
        ))
    }

    fn notify(&self, record: &ChangeRecord) {
        let connection_id: Uuid = self.connection_id().into();
        let event = match record.change() {
            Change::Add { .. } => DirectoryEvent::EntryAdded {
                connection_id,
                dn: record.dn().to_string(),
            },
            Change::Delete => DirectoryEvent::EntryDeleted {
                connection_id,
                dn: record.dn().to_string(),
            },
            Change::ModifyDn { new_superior, .. } => {
                let old_dn = record.dn().to_string();
                let new_dn = record.target_dn_after();
                if new_superior.is_some() {
                    DirectoryEvent::EntryMoved {
                        connection_id,
                        old_dn,
                        new_dn,
                    }
                } else {
                    DirectoryEvent::EntryRenamed {
                        connection_id,
                        old_dn,
                        new_dn,
                    }
                }
            }
            Change::Modify { .. } => return,
        };
        self.events.fire(event);
    }

    /// Called when the session opens: starts from an empty, resumed queue.
    pub fn connection_opened(&self) {
        let dropped = self.queue.reset();
        if dropped > 0 {
            warn!(connection_id = %self.connection_id(), dropped, "Discarded stale change records");
        }
    }

    /// Called when the session closes: pending records are discarded unsent.
    pub fn connection_closed(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!(connection_id = %self.connection_id(), dropped, "Discarded pending change records on close");
        }
    }

    /// Clear the queue and the suspend counter.
    pub fn reset(&self) {
        self.queue.reset();
    }
}

impl std::fmt::Debug for CommitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitPipeline")
            .field("connection_id", &self.connection_id())
            .field("endpoint", &self.session.endpoint())
            .field("referral_policy", &self.referral_policy)
            .field("max_referral_hops", &self.max_referral_hops)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_prefers_abort_error() {
        let report = CommitReport {
            applied: 2,
            failures: vec![CommitFailure {
                dn: "cn=x,dc=test".to_string(),
                sequence: Some(3),
                error: ModificationError::invalid_operation("bad"),
            }],
            aborted: true,
            ..CommitReport::default()
        };
        let err = report.into_result().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_OPERATION");
    }

    #[test]
    fn test_into_result_keeps_tallied_failures() {
        let report = CommitReport {
            applied: 1,
            failures: vec![CommitFailure {
                dn: "cn=x,dc=test".to_string(),
                sequence: None,
                error: ModificationError::Canceled,
            }],
            ..CommitReport::default()
        };
        let report = report.into_result().unwrap();
        assert_eq!(report.attempted(), 2);
        assert!(!report.is_success());
    }

    #[test]
    fn test_bulk_options() {
        let options = CommitOptions::bulk(true);
        assert!(!options.stop_on_error);
        assert!(!options.notify);
        assert!(CommitOptions::bulk(false).stop_on_error);
    }
}
