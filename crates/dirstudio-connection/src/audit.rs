//! Modification audit log.
//!
//! Every attempted commit of a change record yields one [`AuditEntry`]. The
//! [`AuditLogger`] renders it as a block of `#!` header lines followed by the
//! record's canonical text, and hands the block to an [`AuditSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ModificationLogConfig;
use crate::error::{ModificationError, ModificationResult};
use crate::ids::ConnectionId;
use crate::ldif::RenderOptions;
use crate::record::ChangeRecord;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOG_FILE_EXTENSION: &str = "ldiflog";

/// Outcome of one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOutcome {
    Ok,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Ok => "OK",
            AuditOutcome::Error => "ERROR",
        }
    }
}

/// The logged outcome of one attempted change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub outcome: AuditOutcome,
    pub dn: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Server the attempt was made against.
    pub endpoint: String,
    pub connection_id: ConnectionId,
    pub sequence: Option<u64>,
    /// Canonical text of the record, with masked values already replaced.
    pub record: String,
}

impl AuditEntry {
    pub fn is_ok(&self) -> bool {
        self.outcome == AuditOutcome::Ok
    }

    /// Header lines followed by the rendered record.
    pub fn to_log_block(&self) -> String {
        let mut block = format!(
            "#!RESULT {}\n#!CONNECTION {}\n#!DATE {}\n",
            self.outcome.as_str(),
            self.endpoint,
            self.timestamp.format(DATE_FORMAT)
        );
        if let Some(error) = &self.error {
            let flattened = error.replace("\r\n", " ").replace(['\r', '\n'], " ");
            block.push_str("#!ERROR ");
            block.push_str(&flattened);
            block.push('\n');
        }
        block.push_str(&self.record);
        block
    }
}

/// Destination of rendered audit blocks.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry, block: &str) -> io::Result<()>;
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<(AuditEntry, String)>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    /// All blocks concatenated, as a log file would hold them.
    pub fn text(&self) -> String {
        self.entries.lock().iter().map(|(_, b)| b.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn count(&self, outcome: AuditOutcome) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(e, _)| e.outcome == outcome)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: &AuditEntry, block: &str) -> io::Result<()> {
        self.entries.lock().push((entry.clone(), block.to_string()));
        Ok(())
    }
}

/// Emits each block as an INFO event under target `dirstudio::modlog`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: &AuditEntry, block: &str) -> io::Result<()> {
        info!(
            target: "dirstudio::modlog",
            connection_id = %entry.connection_id,
            outcome = entry.outcome.as_str(),
            dn = %entry.dn,
            sequence = ?entry.sequence,
            "{block}"
        );
        Ok(())
    }
}

struct OpenLog {
    file: File,
    len: u64,
}

/// Append-only log files per connection, rotated by size.
///
/// The current file is `<dir>/<connection-id>-0.ldiflog`; on rotation each
/// file shifts to the next index and the oldest beyond `file_count` is
/// dropped.
pub struct FileAuditSink {
    directory: PathBuf,
    connection_id: ConnectionId,
    max_bytes: u64,
    file_count: usize,
    current: Mutex<Option<OpenLog>>,
}

impl FileAuditSink {
    pub fn new(
        directory: impl Into<PathBuf>,
        connection_id: ConnectionId,
        max_bytes: u64,
        file_count: usize,
    ) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            connection_id,
            max_bytes: max_bytes.max(1),
            file_count: file_count.max(1),
            current: Mutex::new(None),
        })
    }

    /// Path of the log file with the given rotation index.
    pub fn file_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!(
            "{}-{index}.{LOG_FILE_EXTENSION}",
            self.connection_id
        ))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn open_current(&self) -> io::Result<OpenLog> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(0))?;
        let len = file.metadata()?.len();
        Ok(OpenLog { file, len })
    }

    fn rotate(&self) -> io::Result<()> {
        let last = self.file_count - 1;
        let oldest = self.file_path(last);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (0..last).rev() {
            let from = self.file_path(index);
            if from.exists() {
                fs::rename(&from, self.file_path(index + 1))?;
            }
        }
        Ok(())
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, _entry: &AuditEntry, block: &str) -> io::Result<()> {
        let mut current = self.current.lock();
        if current.is_none() {
            *current = Some(self.open_current()?);
        }

        let needs_rotation = current.as_ref().is_some_and(|log| {
            log.len > 0 && log.len.saturating_add(block.len() as u64) > self.max_bytes
        });
        if needs_rotation {
            *current = None;
            self.rotate()?;
            *current = Some(self.open_current()?);
        }

        let log = current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "audit log not open"))?;
        log.file.write_all(block.as_bytes())?;
        log.file.flush()?;
        log.len += block.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("directory", &self.directory)
            .field("connection_id", &self.connection_id)
            .field("max_bytes", &self.max_bytes)
            .field("file_count", &self.file_count)
            .finish()
    }
}

/// Renders audit entries and writes them to a sink.
///
/// A failing sink never fails the modification; the write error is logged
/// and the outcome still propagates to the caller.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    options: RenderOptions,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, options: RenderOptions) -> Self {
        Self {
            sink,
            options,
            enabled: true,
        }
    }

    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(TracingAuditSink),
            options: RenderOptions::default(),
            enabled: false,
        }
    }

    /// Build a logger from configuration: a rotating file sink when a
    /// directory is configured, otherwise the tracing sink.
    pub fn from_config(
        config: &ModificationLogConfig,
        connection_id: ConnectionId,
    ) -> ModificationResult<Self> {
        config.validate()?;
        let sink: Arc<dyn AuditSink> = match &config.directory {
            Some(directory) => Arc::new(
                FileAuditSink::new(
                    directory,
                    connection_id,
                    config.file_size_kb.saturating_mul(1024),
                    config.file_count,
                )
                .map_err(|e| {
                    ModificationError::audit_with_source(
                        format!("cannot open audit log in {}", directory.display()),
                        e,
                    )
                })?,
            ),
            None => Arc::new(TracingAuditSink),
        };
        Ok(Self::with_config(sink, config))
    }

    /// Use the given sink with the masking and enablement from `config`.
    pub fn with_config(sink: Arc<dyn AuditSink>, config: &ModificationLogConfig) -> Self {
        Self {
            sink,
            options: config.render_options(),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn render_options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn record_success(
        &self,
        connection_id: ConnectionId,
        endpoint: &str,
        record: &ChangeRecord,
    ) {
        self.record(connection_id, endpoint, record, AuditOutcome::Ok, None);
    }

    pub fn record_failure(
        &self,
        connection_id: ConnectionId,
        endpoint: &str,
        record: &ChangeRecord,
        error: &str,
    ) {
        self.record(
            connection_id,
            endpoint,
            record,
            AuditOutcome::Error,
            Some(error.to_string()),
        );
    }

    fn record(
        &self,
        connection_id: ConnectionId,
        endpoint: &str,
        record: &ChangeRecord,
        outcome: AuditOutcome,
        error: Option<String>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = AuditEntry {
            outcome,
            dn: record.dn().to_string(),
            error,
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            connection_id,
            sequence: record.sequence(),
            record: record.render(&self.options),
        };
        let block = entry.to_log_block();
        if let Err(e) = self.sink.append(&entry, &block) {
            warn!(
                connection_id = %connection_id,
                dn = %entry.dn,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("options", &self.options)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AttributeEdit;
    use chrono::TimeZone;

    fn entry(outcome: AuditOutcome, error: Option<&str>) -> AuditEntry {
        AuditEntry {
            outcome,
            dn: "cn=x,dc=test".to_string(),
            error: error.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            endpoint: "ldap://localhost:389".to_string(),
            connection_id: ConnectionId::new(),
            sequence: Some(1),
            record: ChangeRecord::delete("cn=x,dc=test").to_string(),
        }
    }

    #[test]
    fn test_ok_block_layout() {
        assert_eq!(
            entry(AuditOutcome::Ok, None).to_log_block(),
            "#!RESULT OK\n\
             #!CONNECTION ldap://localhost:389\n\
             #!DATE 2026-03-04 05:06:07\n\
             dn: cn=x,dc=test\n\
             changetype: delete\n\
             \n"
        );
    }

    #[test]
    fn test_error_message_is_flattened() {
        let block = entry(AuditOutcome::Error, Some("no such object\r\nmatched: dc=test")).to_log_block();
        assert!(block.starts_with("#!RESULT ERROR\n"));
        assert!(block.contains("#!ERROR no such object matched: dc=test\n"));
    }

    #[test]
    fn test_logger_masks_configured_attributes() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::with_config(sink.clone(), &ModificationLogConfig::default());
        let record = ChangeRecord::modify(
            "cn=john,dc=test",
            vec![AttributeEdit::replace_value("userPassword", "hunter2")],
        );

        logger.record_success(ConnectionId::new(), "ldap://localhost:389", &record);

        assert_eq!(sink.count(AuditOutcome::Ok), 1);
        assert!(sink.text().contains("userPassword: **********"));
        assert!(!sink.text().contains("hunter2"));
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let sink = Arc::new(MemoryAuditSink::new());
        let config = ModificationLogConfig {
            enabled: false,
            ..ModificationLogConfig::default()
        };
        let logger = AuditLogger::with_config(sink.clone(), &config);
        logger.record_failure(
            ConnectionId::new(),
            "ldap://localhost:389",
            &ChangeRecord::delete("cn=x,dc=test"),
            "boom",
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn test_file_sink_rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path(), ConnectionId::new(), 200, 3).unwrap();
        let e = entry(AuditOutcome::Ok, None);
        let block = e.to_log_block();
        assert!(block.len() < 200);

        for _ in 0..6 {
            sink.append(&e, &block).unwrap();
        }

        assert!(sink.file_path(0).exists());
        assert!(sink.file_path(1).exists());
        assert!(sink.file_path(2).exists());
        assert!(!sink.file_path(3).exists());
        for index in 0..3 {
            let len = fs::metadata(sink.file_path(index)).unwrap().len();
            assert!(len <= 200, "file {index} has {len} bytes");
        }
    }

    #[test]
    fn test_file_sink_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let id = ConnectionId::new();
        let e = entry(AuditOutcome::Ok, None);
        let block = e.to_log_block();

        FileAuditSink::new(dir.path(), id, 10_000, 2)
            .unwrap()
            .append(&e, &block)
            .unwrap();
        let sink = FileAuditSink::new(dir.path(), id, 10_000, 2).unwrap();
        sink.append(&e, &block).unwrap();

        let text = fs::read_to_string(sink.file_path(0)).unwrap();
        assert_eq!(text, format!("{block}{block}"));
    }

    #[test]
    fn test_from_config_accepts_huge_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let id = ConnectionId::new();
        let config = ModificationLogConfig {
            directory: Some(dir.path().to_path_buf()),
            file_size_kb: u64::MAX,
            ..ModificationLogConfig::default()
        };

        let logger = AuditLogger::from_config(&config, id).unwrap();
        logger.record_success(id, "ldap://localhost:389", &ChangeRecord::delete("cn=x,dc=test"));

        let path = FileAuditSink::new(dir.path(), id, 1, 1).unwrap().file_path(0);
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("#!RESULT OK"));
    }
}
