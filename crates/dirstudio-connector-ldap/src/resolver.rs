//! Referral resolution for LDAP endpoints.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use dirstudio_connection::{ConnectionConfig, ConnectionId, DirectorySession, ReferralResolver};

use crate::session::LdapSession;

const LDAP_PORT: u16 = 389;
const LDAPS_PORT: u16 = 636;

/// Server address parsed from a referral URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralEndpoint {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
}

impl ReferralEndpoint {
    /// Parse `ldap[s]://host[:port][/dn...]`. Returns `None` for anything
    /// else.
    pub fn parse(endpoint: &str) -> Option<Self> {
        let url = Url::parse(endpoint.trim()).ok()?;
        let use_ssl = match url.scheme() {
            "ldap" => false,
            "ldaps" => true,
            _ => return None,
        };
        let host = url.host_str().filter(|h| !h.is_empty())?.to_string();
        let port = url
            .port()
            .unwrap_or(if use_ssl { LDAPS_PORT } else { LDAP_PORT });
        Some(Self {
            host,
            port,
            use_ssl,
        })
    }

    /// Cache key shared by every referral to the same server.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host.to_ascii_lowercase(), self.port)
    }
}

/// Resolves referral URLs to LDAP sessions, one per `host:port`.
///
/// New sessions inherit credentials, TLS settings and timeouts from a
/// template configuration. They are returned unopened; the pipeline opens
/// and binds them on first use.
pub struct LdapReferralResolver {
    template: ConnectionConfig,
    sessions: Mutex<HashMap<String, Arc<dyn DirectorySession>>>,
}

impl LdapReferralResolver {
    pub fn new(template: ConnectionConfig) -> Self {
        Self {
            template,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-register a session for an endpoint, e.g. one the user already
    /// opened.
    pub fn register(&self, endpoint: &str, session: Arc<dyn DirectorySession>) -> bool {
        match ReferralEndpoint::parse(endpoint) {
            Some(parsed) => {
                self.sessions.lock().insert(parsed.key(), session);
                true
            }
            None => false,
        }
    }

    pub fn cached_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn config_for(&self, endpoint: &ReferralEndpoint, url: &str) -> ConnectionConfig {
        let mut config = self.template.clone();
        config.id = ConnectionId::new();
        config.name = url.to_string();
        config.host = endpoint.host.clone();
        config.port = endpoint.port;
        config.use_ssl = endpoint.use_ssl;
        config.use_starttls = self.template.use_starttls && !endpoint.use_ssl;
        config
    }
}

#[async_trait]
impl ReferralResolver for LdapReferralResolver {
    async fn resolve(&self, endpoint: &str) -> Option<Arc<dyn DirectorySession>> {
        let Some(parsed) = ReferralEndpoint::parse(endpoint) else {
            debug!(%endpoint, "Unparseable referral endpoint");
            return None;
        };
        let key = parsed.key();

        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&key) {
            return Some(session.clone());
        }

        match LdapSession::new(self.config_for(&parsed, endpoint)) {
            Ok(session) => {
                debug!(%endpoint, %key, "Created referral session");
                let session: Arc<dyn DirectorySession> = Arc::new(session);
                sessions.insert(key, session.clone());
                Some(session)
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "Cannot create referral session");
                None
            }
        }
    }
}

impl std::fmt::Debug for LdapReferralResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapReferralResolver")
            .field("template", &self.template)
            .field("cached_sessions", &self.cached_sessions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ConnectionConfig {
        ConnectionConfig::new("corp", "ldap.example.com")
            .with_starttls()
            .with_bind("cn=admin,dc=example,dc=com", "secret")
    }

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            ReferralEndpoint::parse("ldap://b.example.com/ou=people,dc=example,dc=com"),
            Some(ReferralEndpoint {
                host: "b.example.com".to_string(),
                port: 389,
                use_ssl: false,
            })
        );
        let ssl = ReferralEndpoint::parse("ldaps://c.example.com:1636").unwrap();
        assert_eq!(ssl.port, 1636);
        assert!(ssl.use_ssl);

        assert!(ReferralEndpoint::parse("http://b.example.com").is_none());
        assert!(ReferralEndpoint::parse("not a url").is_none());
        assert!(ReferralEndpoint::parse("ldap:///dc=example,dc=com").is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_cached_per_host_and_port() {
        let resolver = LdapReferralResolver::new(template());

        let a = resolver.resolve("ldap://b.example.com/dc=x").await.unwrap();
        let b = resolver.resolve("ldap://B.example.com:389/dc=y").await.unwrap();
        let c = resolver.resolve("ldap://b.example.com:10389").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(resolver.cached_sessions(), 2);
        assert_eq!(a.endpoint(), "ldap://b.example.com:389");
        assert!(!a.is_connected());
    }

    #[tokio::test]
    async fn test_unparseable_endpoint_resolves_to_none() {
        let resolver = LdapReferralResolver::new(template());
        assert!(resolver.resolve("gopher://b.example.com").await.is_none());
        assert_eq!(resolver.cached_sessions(), 0);
    }

    #[test]
    fn test_config_inherits_template() {
        let resolver = LdapReferralResolver::new(template());
        let endpoint = ReferralEndpoint::parse("ldaps://c.example.com").unwrap();
        let config = resolver.config_for(&endpoint, "ldaps://c.example.com");

        assert_eq!(config.bind_dn.as_deref(), Some("cn=admin,dc=example,dc=com"));
        assert_eq!(config.port, 636);
        assert!(config.use_ssl);
        assert!(!config.use_starttls);
        assert_ne!(config.id, resolver.template.id);
    }

    #[tokio::test]
    async fn test_registered_session_is_returned() {
        let resolver = LdapReferralResolver::new(template());
        let session: Arc<dyn DirectorySession> = Arc::new(
            LdapSession::new(ConnectionConfig::new("known", "known.example.com")).unwrap(),
        );
        assert!(resolver.register("ldap://known.example.com", session.clone()));

        let resolved = resolver.resolve("ldap://known.example.com:389/dc=z").await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &session));
    }
}
