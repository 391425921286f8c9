//! OAuth utilities for the CRM integration.
//!
//! - [`OAuthError`] - error type for token, authorize and REST login calls
//! - [`callback`] - axum routes receiving the authorization redirect
//! - Token expiry helpers

mod error;

#[cfg(feature = "server")]
pub mod callback;

pub use error::OAuthError;

#[cfg(feature = "server")]
pub use callback::{
    CallbackParams, CallbackState, callback_router, frontend_redirect, process_callback,
};

use chrono::{DateTime, Duration, FixedOffset, Utc};

/// Seconds before expiry at which a token is already treated as expired.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// Check if a token has expired (or will expire within the given buffer).
///
/// Returns `false` if `expires_at` is `None`: the CRM did not report a
/// lifetime, so the token is used until a request is refused.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use rolodex::oauth::token_is_expired;
///
/// let now = Utc::now();
/// let expires_at = (now + Duration::minutes(10)).fixed_offset();
///
/// assert!(!token_is_expired(Some(expires_at), now, 300));
/// assert!(token_is_expired(Some(expires_at), now, 700));
/// ```
pub fn token_is_expired(
    expires_at: Option<DateTime<FixedOffset>>,
    now: DateTime<Utc>,
    buffer_secs: i64,
) -> bool {
    match expires_at {
        Some(exp) => now + Duration::seconds(buffer_secs) >= exp,
        None => false,
    }
}

/// Compute the absolute expiry from an `expires_in` lifetime in seconds.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use rolodex::oauth::compute_expires_at;
///
/// let issued = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
/// let expires = compute_expires_at(issued, Some(600)).unwrap();
/// assert_eq!(expires.to_rfc3339(), "2025-01-01T00:10:00+00:00");
/// assert!(compute_expires_at(issued, None).is_none());
/// ```
pub fn compute_expires_at(
    issued_at: DateTime<Utc>,
    expires_in: Option<u64>,
) -> Option<DateTime<FixedOffset>> {
    let secs = i64::try_from(expires_in?).ok()?;
    issued_at
        .checked_add_signed(Duration::try_seconds(secs)?)
        .map(|at| at.fixed_offset())
}

/// Normalize a host string into a base URL with HTTPS scheme and no trailing slash.
///
/// ```
/// use rolodex::oauth::normalize_host;
///
/// assert_eq!(normalize_host("auth.example.com"), "https://auth.example.com");
/// assert_eq!(normalize_host("https://auth.example.com/"), "https://auth.example.com");
/// assert_eq!(normalize_host("http://localhost:3000"), "http://localhost:3000");
/// ```
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
