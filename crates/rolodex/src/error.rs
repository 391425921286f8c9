//! Error taxonomy for CRM-facing operations.

use sea_orm::DbErr;
use thiserror::Error;

use crate::oauth::OAuthError;

/// Errors surfaced by the token store, the CRM client, and the overlap checker.
#[derive(Debug, Error)]
pub enum CrmError {
    /// No saved credentials; an operator has to connect the integration first.
    #[error("CRM integration is not configured; connect it first")]
    AuthNotConfigured,

    /// Refresh and every fallback re-authentication failed.
    #[error("CRM credentials expired and could not be refreshed: {message}")]
    AuthExpired { message: String },

    /// The retry budget for 429 responses was exhausted.
    #[error("CRM rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Transient network failure after bounded retries.
    #[error("CRM unavailable after {attempts} attempts: {message}")]
    Unavailable { message: String, attempts: u32 },

    /// Non-retryable error response for a specific request.
    #[error("CRM rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// A record without a usable key.
    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The CRM answered with a body we could not decode.
    #[error("Failed to decode CRM response: {0}")]
    Decode(String),

    /// Local database failure.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl CrmError {
    /// Create an `AuthExpired` error.
    #[inline]
    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::AuthExpired {
            message: message.into(),
        }
    }

    /// Create a `RemoteRejected` error, keeping only the first line of the body.
    pub fn remote_rejected(status: u16, body: &str) -> Self {
        let message = body.lines().next().unwrap_or_default().trim();
        let message = if message.chars().count() > 300 {
            format!("{}...", message.chars().take(300).collect::<String>())
        } else {
            message.to_string()
        };
        Self::RemoteRejected { status, message }
    }

    /// Whether the error means credentials are missing or unusable.
    #[inline]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthNotConfigured | Self::AuthExpired { .. })
    }

    /// Whether the error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<OAuthError> for CrmError {
    fn from(err: OAuthError) -> Self {
        Self::auth_expired(err.to_string())
    }
}

/// Result type for CRM operations.
pub type Result<T> = std::result::Result<T, CrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejected_keeps_first_line() {
        let err = CrmError::remote_rejected(400, "bad where clause\nstack trace here");
        assert_eq!(err.to_string(), "CRM rejected request (400): bad where clause");
    }

    #[test]
    fn remote_rejected_truncates_long_bodies() {
        let body = "x".repeat(1000);
        match CrmError::remote_rejected(500, &body) {
            CrmError::RemoteRejected { message, .. } => {
                assert_eq!(message.len(), 303);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classification_helpers() {
        assert!(CrmError::AuthNotConfigured.is_auth_failure());
        assert!(CrmError::auth_expired("revoked").is_auth_failure());
        assert!(!CrmError::RateLimited { attempts: 3 }.is_auth_failure());
        assert!(CrmError::RateLimited { attempts: 3 }.is_rate_limited());
        assert!(!CrmError::Cancelled.is_rate_limited());
    }

    #[test]
    fn oauth_errors_become_auth_expired() {
        let err: CrmError = OAuthError::AccessDenied.into();
        assert!(matches!(err, CrmError::AuthExpired { .. }));
    }
}
