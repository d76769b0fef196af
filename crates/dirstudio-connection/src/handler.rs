//! Modification handler: the entry point for directory mutations on one
//! connection.
//!
//! Each request is turned into change records by the
//! [`ChangeRecordBuilder`], queued, and committed through the
//! [`CommitPipeline`].

use std::sync::Arc;

use dirstudio_events::DirectoryEvent;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::builder::{ChangeRecordBuilder, EntryTarget};
use crate::error::{ModificationError, ModificationResult};
use crate::pipeline::{CommitOptions, CommitPipeline, CommitReport};
use crate::record::{Attribute, AttributeValue, ChangeRecord};

/// Outcome of a bulk import.
#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Records the directory accepted.
    pub imported: usize,
    /// Records that failed, including malformed ones.
    pub errors: usize,
    /// Records left queued because the handler was suspended.
    pub deferred: usize,
    /// The import stopped on the cancellation token.
    pub canceled: bool,
    /// The failure that ended the import when not continuing on error.
    pub aborted_by: Option<ModificationError>,
}

impl ImportSummary {
    pub fn attempted(&self) -> usize {
        self.imported + self.errors
    }
}

/// Applies single and bulk modifications to one connection.
#[derive(Debug, Clone)]
pub struct ModificationHandler {
    pipeline: Arc<CommitPipeline>,
}

impl ModificationHandler {
    pub fn new(pipeline: Arc<CommitPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<CommitPipeline> {
        &self.pipeline
    }

    async fn submit(&self, record: ChangeRecord) -> ModificationResult<CommitReport> {
        self.pipeline
            .enqueue(record, CommitOptions::default(), &CancellationToken::new())
            .await
    }

    pub async fn create_value(
        &self,
        target: &EntryTarget,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::create_value(target, attribute, value)?;
        self.submit(record).await
    }

    /// Change one value in place; see [`ChangeRecordBuilder::modify_value`].
    pub async fn modify_value(
        &self,
        target: &EntryTarget,
        attribute: &str,
        value_count: usize,
        old_value: impl Into<AttributeValue>,
        new_value: impl Into<AttributeValue>,
    ) -> ModificationResult<CommitReport> {
        let record =
            ChangeRecordBuilder::modify_value(target, attribute, value_count, old_value, new_value)?;
        self.submit(record).await
    }

    pub async fn delete_value(
        &self,
        target: &EntryTarget,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::delete_value(target, attribute, value)?;
        self.submit(record).await
    }

    pub async fn delete_attribute(
        &self,
        target: &EntryTarget,
        attribute: &str,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::delete_attribute(target, attribute)?;
        self.submit(record).await
    }

    pub async fn create_entry(
        &self,
        target: &EntryTarget,
        attributes: Vec<Attribute>,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::create_entry(target, attributes)?;
        self.submit(record).await
    }

    pub async fn rename_entry(
        &self,
        target: &EntryTarget,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::rename_entry(target, new_rdn, delete_old_rdn)?;
        self.submit(record).await
    }

    pub async fn move_entry(
        &self,
        target: &EntryTarget,
        new_parent: &str,
    ) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::move_entry(target, new_parent)?;
        self.submit(record).await
    }

    pub async fn delete_entry(&self, target: &EntryTarget) -> ModificationResult<CommitReport> {
        let record = ChangeRecordBuilder::delete_entry(target)?;
        self.submit(record).await
    }

    /// Apply several records as one pass, stopping at the first failure.
    ///
    /// Every record is validated before any is queued, so a malformed one
    /// rejects the whole batch.
    pub async fn apply_all(
        &self,
        records: Vec<ChangeRecord>,
        cancel: &CancellationToken,
    ) -> ModificationResult<CommitReport> {
        for record in &records {
            record.validate()?;
        }
        self.pipeline.suspend();
        for record in records {
            self.pipeline.queue().push(record);
        }
        self.pipeline.resume(CommitOptions::default(), cancel).await
    }

    /// Import externally parsed records one at a time.
    ///
    /// Per-record notifications are silenced and a single
    /// [`DirectoryEvent::BulkModification`] is fired afterwards if anything
    /// was attempted. Without `continue_on_error` the first failure ends the
    /// import and the remaining records are never attempted.
    ///
    /// An import runs its own commit passes. While the handler is suspended
    /// it queues nothing and ends with [`ModificationError::InvalidOperation`]
    /// in [`ImportSummary::aborted_by`].
    #[instrument(skip(self, records, cancel), fields(connection_id = %self.pipeline.connection_id()))]
    pub async fn import<I>(
        &self,
        records: I,
        continue_on_error: bool,
        cancel: &CancellationToken,
    ) -> ImportSummary
    where
        I: IntoIterator<Item = ChangeRecord>,
        I::IntoIter: Send,
    {
        let options = CommitOptions::bulk(continue_on_error);
        let mut summary = ImportSummary::default();

        for record in records {
            if cancel.is_cancelled() {
                summary.canceled = true;
                break;
            }

            if self.pipeline.queue().is_suspended() {
                warn!("Commits are suspended, stopping import");
                summary.aborted_by = Some(ModificationError::invalid_operation(
                    "cannot import while commits are suspended",
                ));
                break;
            }

            let dn = record.dn().to_string();
            if let Err(e) = self.pipeline.push(record) {
                warn!(%dn, error = %e, "Skipping malformed record");
                summary.errors += 1;
                if continue_on_error {
                    continue;
                }
                summary.aborted_by = Some(e);
                break;
            }

            let report = self.pipeline.commit(options, cancel).await;
            summary.imported += report.applied;
            summary.errors += report.failures.len();
            summary.deferred = report.deferred;
            if report.deferred > 0 {
                warn!(deferred = report.deferred, "Commits suspended during import");
                summary.aborted_by = Some(ModificationError::invalid_operation(
                    "commits were suspended during import",
                ));
                break;
            }
            if report.canceled {
                summary.canceled = true;
                break;
            }
            if report.aborted {
                summary.aborted_by = report.failures.into_iter().last().map(|f| f.error);
                break;
            }
        }

        info!(
            imported = summary.imported,
            errors = summary.errors,
            canceled = summary.canceled,
            "Import finished"
        );
        if summary.attempted() > 0 {
            self.pipeline.events().fire(DirectoryEvent::BulkModification {
                connection_id: self.pipeline.connection_id().into(),
            });
        }
        summary
    }

    /// Defer commits; see [`CommitPipeline::suspend`].
    pub fn suspend(&self) {
        self.pipeline.suspend();
    }

    pub async fn resume(&self, cancel: &CancellationToken) -> ModificationResult<CommitReport> {
        self.pipeline.resume(CommitOptions::default(), cancel).await
    }

    pub fn connection_opened(&self) {
        self.pipeline.connection_opened();
    }

    pub fn connection_closed(&self) {
        self.pipeline.connection_closed();
    }

    pub fn reset(&self) {
        self.pipeline.reset();
    }
}
