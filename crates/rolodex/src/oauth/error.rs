//! OAuth error types.

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur while talking to the CRM's OAuth and login endpoints.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] HttpError),

    /// Failed to parse a response from the authorization server.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The user denied the authorization request.
    #[error("Authorization was denied by the user.")]
    AccessDenied,

    /// Missing client id/secret or other setup problem.
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    /// The endpoint answered with an error status.
    #[error("{endpoint} returned {status}: {message}")]
    Rejected {
        /// Which endpoint failed (e.g. "token", "authorize", "login").
        endpoint: &'static str,
        status: u16,
        message: String,
    },

    /// The authorization server reported an OAuth error code.
    #[error("CRM error: {message}")]
    Provider { message: String },
}

impl OAuthError {
    /// Create a provider-reported error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create an error for a non-success endpoint response.
    pub fn rejected(endpoint: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            endpoint,
            status,
            message: message.into(),
        }
    }

    /// Whether the failure means the grant itself is no longer usable
    /// (as opposed to the server being unreachable).
    pub fn is_grant_rejected(&self) -> bool {
        match self {
            Self::AccessDenied | Self::Provider { .. } => true,
            Self::Rejected { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}
