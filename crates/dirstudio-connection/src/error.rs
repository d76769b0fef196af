//! Error types for directory sessions and the modification pipeline.
//!
//! [`SessionError`] is what a directory session reports; [`ModificationError`]
//! is what callers of the pipeline see. A referral is not an error: sessions
//! report it through [`crate::session::ApplyOutcome::Referral`].

use thiserror::Error;

/// LDAP result code for an invalid-credentials bind.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for a missing target entry.
pub const RC_NO_SUCH_OBJECT: u32 = 32;

const RC_BUSY: u32 = 51;
const RC_UNAVAILABLE: u32 = 52;

/// Failure reported by a directory session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to establish the connection.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection attempt timed out.
    #[error("connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// Bind rejected the credentials.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// The server rejected the operation.
    #[error("operation failed{}: {message}", .result_code.map(|rc| format!(" (rc={rc})")).unwrap_or_default())]
    OperationFailed {
        result_code: Option<u32>,
        message: String,
    },

    /// Transport failure while talking to the server.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation was attempted before `open`.
    #[error("session is not connected")]
    NotConnected,

    /// The target is held elsewhere and referrals are not followed.
    #[error("referral returned: {}", .endpoints.join(", "))]
    Referral { endpoints: Vec<String> },
}

impl SessionError {
    /// Check if this error is transient and the operation may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::ConnectionFailed { .. }
            | SessionError::ConnectionTimeout { .. }
            | SessionError::Network { .. }
            | SessionError::NotConnected => true,
            SessionError::OperationFailed { result_code, .. } => {
                matches!(result_code, Some(RC_BUSY | RC_UNAVAILABLE))
            }
            SessionError::AuthenticationFailed | SessionError::Referral { .. } => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            SessionError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            SessionError::AuthenticationFailed => "AUTH_FAILED",
            SessionError::OperationFailed { .. } => "OPERATION_FAILED",
            SessionError::Network { .. } => "NETWORK_ERROR",
            SessionError::NotConnected => "NOT_CONNECTED",
            SessionError::Referral { .. } => "REFERRAL",
        }
    }

    /// The directory result code, when the server supplied one.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            SessionError::OperationFailed { result_code, .. } => *result_code,
            SessionError::AuthenticationFailed => Some(RC_INVALID_CREDENTIALS),
            _ => None,
        }
    }

    // Convenience constructors

    pub fn connection_failed(message: impl Into<String>) -> Self {
        SessionError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SessionError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failure without a result code.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        SessionError::OperationFailed {
            result_code: None,
            message: message.into(),
        }
    }

    /// Create an operation failure carrying the server's result code.
    pub fn operation_failed_with_code(result_code: u32, message: impl Into<String>) -> Self {
        SessionError::OperationFailed {
            result_code: Some(result_code),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        SessionError::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SessionError::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Error returned by the modification pipeline and its facade.
#[derive(Debug, Error)]
pub enum ModificationError {
    /// Malformed request, rejected before anything is enqueued.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// No offered referral endpoint produced a usable session.
    #[error("referral unresolved ({reason}): {}", .endpoints.join(", "))]
    ReferralUnresolved {
        endpoints: Vec<String>,
        reason: String,
    },

    /// The directory session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The pass was canceled cooperatively.
    #[error("operation canceled")]
    Canceled,

    /// Connection or log configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// The audit sink could not be set up.
    #[error("audit log error: {message}")]
    Audit {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ModificationError {
    pub fn is_transient(&self) -> bool {
        match self {
            ModificationError::Session(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModificationError::InvalidOperation { .. } => "INVALID_OPERATION",
            ModificationError::ReferralUnresolved { .. } => "REFERRAL_UNRESOLVED",
            ModificationError::Session(e) => e.error_code(),
            ModificationError::Canceled => "CANCELED",
            ModificationError::Configuration { .. } => "INVALID_CONFIG",
            ModificationError::Audit { .. } => "AUDIT_ERROR",
        }
    }

    /// The underlying session error, if any.
    pub fn as_session_error(&self) -> Option<&SessionError> {
        match self {
            ModificationError::Session(e) => Some(e),
            _ => None,
        }
    }

    // Convenience constructors

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        ModificationError::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn referral_unresolved(endpoints: Vec<String>, reason: impl Into<String>) -> Self {
        ModificationError::ReferralUnresolved {
            endpoints,
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ModificationError::Configuration {
            message: message.into(),
        }
    }

    pub fn audit_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ModificationError::Audit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for modification pipeline operations.
pub type ModificationResult<T> = Result<T, ModificationError>;

/// Result type for directory session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SessionError::network("reset by peer").is_transient());
        assert!(SessionError::NotConnected.is_transient());
        assert!(SessionError::operation_failed_with_code(51, "busy").is_transient());
        assert!(SessionError::operation_failed_with_code(RC_NO_SUCH_OBJECT, "no such object")
            .is_permanent());
        assert!(SessionError::AuthenticationFailed.is_permanent());
    }

    #[test]
    fn test_operation_failed_display() {
        let err = SessionError::operation_failed_with_code(32, "no such object");
        assert_eq!(err.to_string(), "operation failed (rc=32): no such object");
        assert_eq!(err.result_code(), Some(32));

        let err = SessionError::operation_failed("rejected");
        assert_eq!(err.to_string(), "operation failed: rejected");
    }

    #[test]
    fn test_session_error_wraps_transparently() {
        let err: ModificationError = SessionError::operation_failed("no such object").into();
        assert_eq!(err.to_string(), "operation failed: no such object");
        assert_eq!(err.error_code(), "OPERATION_FAILED");
        assert!(err.as_session_error().is_some());
    }

    #[test]
    fn test_referral_unresolved_lists_endpoints() {
        let err = ModificationError::referral_unresolved(
            vec!["ldap://b:389".to_string(), "ldap://c:389".to_string()],
            "no session",
        );
        assert_eq!(
            err.to_string(),
            "referral unresolved (no session): ldap://b:389, ldap://c:389"
        );
        assert_eq!(err.error_code(), "REFERRAL_UNRESOLVED");
    }
}
