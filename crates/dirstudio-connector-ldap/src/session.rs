//! LDAP-backed directory session.

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use dirstudio_connection::error::{RC_INVALID_CREDENTIALS, RC_NO_SUCH_OBJECT};
use dirstudio_connection::{
    ApplyOutcome, Attribute, AttributeEdit, Change, ChangeRecord, ConnectionConfig, ConnectionId,
    Control, DirectorySession, ModKind, ModificationResult, SessionError, SessionResult,
};

const RC_SUCCESS: u32 = 0;
const RC_REFERRAL: u32 = 10;

/// A directory session speaking LDAP through `ldap3`.
pub struct LdapSession {
    config: ConnectionConfig,
    connection: RwLock<Option<Ldap>>,
    connected: Arc<AtomicBool>,
}

impl LdapSession {
    /// Create an unopened session.
    pub fn new(config: ConnectionConfig) -> ModificationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn ldap(&self) -> SessionResult<Ldap> {
        self.connection
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(SessionError::NotConnected)
    }

    /// Map a transport error, marking the session disconnected.
    fn transport_error(&self, context: String, error: LdapError) -> SessionError {
        self.connected.store(false, Ordering::SeqCst);
        SessionError::network_with_source(context, error)
    }

    async fn send(&self, record: &ChangeRecord) -> Result<LdapResult, SessionError> {
        let mut ldap = self.ldap().await?;
        if !record.controls().is_empty() {
            ldap.with_controls(to_raw_controls(record.controls()));
        }

        let dn = record.dn();
        let result = match record.change() {
            Change::Add { attributes } => ldap.add(dn, to_add_attrs(attributes)).await,
            Change::Modify { edits } => ldap.modify(dn, to_mods(edits)).await,
            Change::Delete => ldap.delete(dn).await,
            Change::ModifyDn {
                new_rdn,
                delete_old_rdn,
                new_superior,
            } => {
                ldap.modifydn(dn, new_rdn, *delete_old_rdn, new_superior.as_deref())
                    .await
            }
        };
        result.map_err(|e| {
            self.transport_error(
                format!("LDAP {} of '{}' failed", record.change_type(), dn),
                e,
            )
        })
    }
}

/// Await a connection attempt, bounded by the configured timeout.
pub(crate) async fn connect_within<T, F>(
    timeout_secs: u64,
    url: &str,
    connect: F,
) -> SessionResult<T>
where
    F: Future<Output = Result<T, LdapError>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), connect).await {
        Ok(Ok(connected)) => Ok(connected),
        Ok(Err(e)) => Err(SessionError::connection_failed_with_source(
            format!("Failed to connect to LDAP server at {url}"),
            e,
        )),
        Err(_) => Err(SessionError::ConnectionTimeout { timeout_secs }),
    }
}

/// Translate an LDAP result into the pipeline's outcome.
pub(crate) fn outcome(result: LdapResult) -> ApplyOutcome {
    match result.rc {
        RC_SUCCESS => ApplyOutcome::Ok,
        RC_REFERRAL => ApplyOutcome::Referral(result.refs),
        rc => {
            let message = if result.text.is_empty() {
                default_message(rc).to_string()
            } else {
                result.text
            };
            ApplyOutcome::Error(SessionError::operation_failed_with_code(rc, message))
        }
    }
}

fn default_message(rc: u32) -> &'static str {
    match rc {
        RC_NO_SUCH_OBJECT => "no such object",
        RC_INVALID_CREDENTIALS => "invalid credentials",
        50 => "insufficient access rights",
        65 => "object class violation",
        68 => "entry already exists",
        _ => "operation failed",
    }
}

pub(crate) fn to_raw_controls(controls: &[Control]) -> Vec<RawControl> {
    controls
        .iter()
        .map(|c| RawControl {
            ctype: c.oid.clone(),
            crit: c.critical,
            val: c.value.clone(),
        })
        .collect()
}

pub(crate) fn to_add_attrs(attributes: &[Attribute]) -> Vec<(Vec<u8>, HashSet<Vec<u8>>)> {
    attributes
        .iter()
        .map(|a| {
            let values = a.values.iter().map(|v| v.as_bytes().to_vec()).collect();
            (a.name.as_bytes().to_vec(), values)
        })
        .collect()
}

pub(crate) fn to_mods(edits: &[AttributeEdit]) -> Vec<Mod<Vec<u8>>> {
    edits
        .iter()
        .map(|edit| {
            let name = edit.attribute.as_bytes().to_vec();
            let values: HashSet<Vec<u8>> =
                edit.values.iter().map(|v| v.as_bytes().to_vec()).collect();
            match edit.kind {
                ModKind::Add => Mod::Add(name, values),
                ModKind::Replace => Mod::Replace(name, values),
                ModKind::Delete => Mod::Delete(name, values),
            }
        })
        .collect()
}

#[async_trait]
impl DirectorySession for LdapSession {
    fn connection_id(&self) -> ConnectionId {
        self.config.id
    }

    fn endpoint(&self) -> String {
        self.config.url()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), fields(url = %self.config.url()))]
    async fn open(&self) -> SessionResult<()> {
        let url = self.config.url();
        debug!("Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_starttls(self.config.use_starttls)
            .set_no_tls_verify(!self.config.tls_verify);

        let (conn, ldap) = connect_within(
            self.config.connect_timeout_secs,
            &url,
            LdapConnAsync::with_settings(settings, &url),
        )
        .await?;

        let connected = self.connected.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
            connected.store(false, Ordering::SeqCst);
        });

        *self.connection.write().await = Some(ldap);
        self.connected.store(true, Ordering::SeqCst);
        info!("LDAP connection established");
        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.config.url()))]
    async fn bind(&self) -> SessionResult<()> {
        let mut ldap = self.ldap().await?;
        let bind_dn = self.config.bind_dn.as_deref().unwrap_or("");
        let password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");
        let result = ldap
            .simple_bind(bind_dn, password)
            .await
            .map_err(|e| self.transport_error(format!("LDAP bind failed for '{bind_dn}'"), e))?;

        match result.rc {
            RC_SUCCESS => Ok(()),
            RC_INVALID_CREDENTIALS => Err(SessionError::AuthenticationFailed),
            rc => Err(SessionError::operation_failed_with_code(
                rc,
                format!("LDAP bind failed: {}", result.text),
            )),
        }
    }

    #[instrument(skip(self, record), fields(dn = %record.dn(), changetype = %record.change_type()))]
    async fn apply_change(&self, record: &ChangeRecord) -> ApplyOutcome {
        match self.send(record).await {
            Ok(result) => {
                debug!(rc = result.rc, "LDAP operation finished");
                outcome(result)
            }
            Err(e) => ApplyOutcome::Error(e),
        }
    }

    async fn close(&self) -> SessionResult<()> {
        let taken = self.connection.write().await.take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut ldap) = taken {
            ldap.unbind()
                .await
                .map_err(|e| SessionError::network_with_source("LDAP unbind failed", e))?;
            info!(url = %self.config.url(), "LDAP connection closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSession")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstudio_connection::AttributeValue;

    fn ldap_result(rc: u32, text: &str, refs: &[&str]) -> LdapResult {
        LdapResult {
            rc,
            matched: String::new(),
            text: text.to_string(),
            refs: refs.iter().map(|r| r.to_string()).collect(),
            ctrls: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_mapping() {
        assert!(outcome(ldap_result(0, "", &[])).is_ok());

        match outcome(ldap_result(10, "", &["ldap://b:389/dc=test"])) {
            ApplyOutcome::Referral(refs) => assert_eq!(refs, vec!["ldap://b:389/dc=test"]),
            other => panic!("unexpected {other:?}"),
        }

        match outcome(ldap_result(32, "", &[])) {
            ApplyOutcome::Error(e) => {
                assert_eq!(e.result_code(), Some(32));
                assert!(e.to_string().contains("no such object"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mods_preserve_edit_order() {
        let edits = vec![
            AttributeEdit::add_value("mail", "new@test"),
            AttributeEdit::delete_value("mail", "old@test"),
            AttributeEdit::delete_attribute("description"),
        ];
        let mods = to_mods(&edits);
        assert_eq!(mods.len(), 3);
        assert!(matches!(&mods[0], Mod::Add(name, values)
            if name == b"mail" && values.contains(&b"new@test".to_vec())));
        assert!(matches!(&mods[1], Mod::Delete(_, values) if values.len() == 1));
        assert!(matches!(&mods[2], Mod::Delete(name, values)
            if name == b"description" && values.is_empty()));
    }

    #[test]
    fn test_add_attrs_carry_binary_values() {
        let attrs = to_add_attrs(&[
            Attribute::new("objectClass", ["top", "person"]),
            Attribute::single("jpegPhoto", AttributeValue::Binary(vec![0xFF, 0xD8])),
        ]);
        assert_eq!(attrs[0].1.len(), 2);
        assert!(attrs[1].1.contains(&vec![0xFF, 0xD8]));
    }

    #[test]
    fn test_raw_controls() {
        let raw = to_raw_controls(&[Control::manage_dsa_it()]);
        assert_eq!(raw[0].ctype, "2.16.840.1.113730.3.4.2");
        assert!(raw[0].crit);
        assert!(raw[0].val.is_none());
    }

    #[tokio::test]
    async fn test_apply_before_open_is_not_connected() {
        let session = LdapSession::new(ConnectionConfig::new("test", "localhost")).unwrap();
        assert!(!session.is_connected());
        match session.apply_change(&ChangeRecord::delete("cn=a,dc=test")).await {
            ApplyOutcome::Error(SessionError::NotConnected) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_timeout_is_reported_as_timeout() {
        let result: SessionResult<()> = connect_within(
            0,
            "ldap://unreachable:389",
            std::future::pending::<Result<(), LdapError>>(),
        )
        .await;

        match result {
            Err(SessionError::ConnectionTimeout { timeout_secs }) => assert_eq!(timeout_secs, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_error_is_connection_failed() {
        let result: SessionResult<()> = connect_within(5, "ldap://bad:389", async {
            Err(LdapError::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        })
        .await;

        assert_eq!(result.unwrap_err().error_code(), "CONNECTION_FAILED");
    }

    #[test]
    fn test_endpoint_is_url() {
        let session =
            LdapSession::new(ConnectionConfig::new("test", "ldap.example.com").with_ssl()).unwrap();
        assert_eq!(session.endpoint(), "ldaps://ldap.example.com:636");
    }
}
