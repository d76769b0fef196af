//! Connection and modification-log configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ModificationError, ModificationResult};
use crate::ids::ConnectionId;
use crate::ldif::RenderOptions;

/// How the commit pipeline reacts to a referral returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralPolicy {
    /// Treat the referral as a failure.
    Ignore,
    /// Resolve an offered endpoint and resubmit there.
    #[default]
    Follow,
}

impl FromStr for ReferralPolicy {
    type Err = ModificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(ReferralPolicy::Ignore),
            "follow" | "follow_manually" => Ok(ReferralPolicy::Follow),
            other => Err(ModificationError::configuration(format!(
                "unknown referral policy '{other}'"
            ))),
        }
    }
}

/// Settings of the per-connection modification audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationLogConfig {
    /// Write audit entries at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attributes whose values are masked (case-insensitive).
    #[serde(default = "default_masked_attributes")]
    pub masked_attributes: Vec<String>,

    /// Directory for rotating log files. Without one, entries go to tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Size limit of one log file in KiB.
    #[serde(default = "default_file_size_kb")]
    pub file_size_kb: u64,

    /// Number of rotated files kept.
    #[serde(default = "default_file_count")]
    pub file_count: usize,
}

fn default_true() -> bool {
    true
}

fn default_masked_attributes() -> Vec<String> {
    vec!["userPassword".to_string()]
}

fn default_file_size_kb() -> u64 {
    100
}

fn default_file_count() -> usize {
    10
}

impl Default for ModificationLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            masked_attributes: default_masked_attributes(),
            directory: None,
            file_size_kb: default_file_size_kb(),
            file_count: default_file_count(),
        }
    }
}

fn env_parse<T: FromStr>(var: &str) -> ModificationResult<Option<T>> {
    match env::var(var) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ModificationError::configuration(format!("invalid value for {var}: '{v}'"))),
        Err(_) => Ok(None),
    }
}

impl ModificationLogConfig {
    /// Read settings from `DIRSTUDIO_MODLOG_*` environment variables.
    ///
    /// - `DIRSTUDIO_MODLOG_ENABLED` (`true`/`false`)
    /// - `DIRSTUDIO_MODLOG_MASKED_ATTRIBUTES` (comma-separated)
    /// - `DIRSTUDIO_MODLOG_DIR`
    /// - `DIRSTUDIO_MODLOG_FILE_SIZE_KB`
    /// - `DIRSTUDIO_MODLOG_FILE_COUNT`
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> ModificationResult<Self> {
        let mut config = Self::default();

        if let Some(enabled) = env_parse::<bool>("DIRSTUDIO_MODLOG_ENABLED")? {
            config.enabled = enabled;
        }
        if let Ok(masked) = env::var("DIRSTUDIO_MODLOG_MASKED_ATTRIBUTES") {
            config.masked_attributes = masked
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(dir) = env::var("DIRSTUDIO_MODLOG_DIR") {
            if !dir.trim().is_empty() {
                config.directory = Some(PathBuf::from(dir));
            }
        }
        if let Some(size) = env_parse("DIRSTUDIO_MODLOG_FILE_SIZE_KB")? {
            config.file_size_kb = size;
        }
        if let Some(count) = env_parse("DIRSTUDIO_MODLOG_FILE_COUNT")? {
            config.file_count = count;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModificationResult<()> {
        if self.file_size_kb == 0 {
            return Err(ModificationError::configuration(
                "modification log file size must be positive",
            ));
        }
        if self.file_count == 0 {
            return Err(ModificationError::configuration(
                "modification log must keep at least one file",
            ));
        }
        Ok(())
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions::with_masked_attributes(&self.masked_attributes)
    }
}

/// Configuration of one directory connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub id: ConnectionId,

    /// Display name.
    pub name: String,

    pub host: String,

    /// 389 for LDAP, 636 for LDAPS.
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    #[serde(default)]
    pub use_ssl: bool,

    #[serde(default)]
    pub use_starttls: bool,

    /// Verify the server certificate when TLS is used.
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub referral_policy: ReferralPolicy,

    /// Upper bound on referral hops per record; `None` follows without limit.
    #[serde(default = "default_max_referral_hops")]
    pub max_referral_hops: Option<u32>,

    #[serde(default)]
    pub modification_log: ModificationLogConfig,
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_referral_hops() -> Option<u32> {
    Some(10)
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("tls_verify", &self.tls_verify)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("referral_policy", &self.referral_policy)
            .field("max_referral_hops", &self.max_referral_hops)
            .field("modification_log", &self.modification_log)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            name: name.into(),
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            tls_verify: true,
            bind_dn: None,
            bind_password: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            referral_policy: ReferralPolicy::default(),
            max_referral_hops: default_max_referral_hops(),
            modification_log: ModificationLogConfig::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable LDAPS on port 636.
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    #[must_use]
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self.bind_password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_referral_policy(mut self, policy: ReferralPolicy) -> Self {
        self.referral_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_referral_hops(mut self, hops: Option<u32>) -> Self {
        self.max_referral_hops = hops;
        self
    }

    #[must_use]
    pub fn with_modification_log(mut self, log: ModificationLogConfig) -> Self {
        self.modification_log = log;
        self
    }

    /// The server URL, e.g. `ldap://host:389`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> ModificationResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModificationError::configuration("host is required"));
        }
        if self.port == 0 {
            return Err(ModificationError::configuration("port must be non-zero"));
        }
        if self.use_ssl && self.use_starttls {
            return Err(ModificationError::configuration(
                "use_ssl and use_starttls are mutually exclusive",
            ));
        }
        if self.bind_password.is_some() && self.bind_dn.is_none() {
            return Err(ModificationError::configuration(
                "bind_password requires bind_dn",
            ));
        }
        if self.max_referral_hops == Some(0) {
            return Err(ModificationError::configuration(
                "max_referral_hops must be positive; use referral_policy = ignore instead",
            ));
        }
        self.modification_log.validate()
    }
}
