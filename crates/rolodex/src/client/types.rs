//! Request and response types for the CRM REST API.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::rate_limit::DEFAULT_REQUESTS_PER_SECOND;
use crate::retry::RetryPolicy;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fields requested for every contact.
pub const CONTACT_FIELDS: &str =
    "id,firstName,lastName,email,phone,isDeleted,dateLastModified,clientCorporation(name)";

/// A GET request against the session REST base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmRequest {
    /// Path relative to the REST base URL, e.g. `query/ClientContact`.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl CrmRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Paginated contact query.
    pub fn contact_page(start: i64, count: i64, include_deleted: bool) -> Self {
        let filter = if include_deleted {
            "id>0"
        } else {
            "isDeleted=false"
        };
        Self::get("query/ClientContact")
            .param("where", filter)
            .param("fields", CONTACT_FIELDS)
            .param("orderBy", "id")
            .param("showTotalMatched", "true")
            .param("start", start)
            .param("count", count)
    }

    /// Single-record existence search by email.
    pub fn contact_by_email(email: &str) -> Self {
        let needle = email.replace('"', "");
        Self::get("search/ClientContact")
            .param("query", format!("email:\"{needle}\""))
            .param("fields", "id,email")
            .param("count", 1)
    }
}

/// One page of the paginated contact query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContactPage {
    /// Total matching records, when the CRM reports it.
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Tunables for [`super::CrmClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmClientOptions {
    pub requests_per_second: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CrmClientOptions {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::standard(),
        }
    }
}

/// Why the client is about to sleep before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffReason {
    RateLimited,
    Network,
}

/// Reported before every retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffNotice {
    pub reason: BackoffReason,
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_page_filters_deleted_by_default() {
        let req = CrmRequest::contact_page(200, 50, false);
        assert_eq!(req.path, "query/ClientContact");
        assert!(req.query.contains(&("where".into(), "isDeleted=false".into())));
        assert!(req.query.contains(&("start".into(), "200".into())));
        assert!(req.query.contains(&("count".into(), "50".into())));

        let req = CrmRequest::contact_page(0, 50, true);
        assert!(req.query.contains(&("where".into(), "id>0".into())));
    }

    #[test]
    fn email_search_strips_quotes() {
        let req = CrmRequest::contact_by_email("a\"b@x.com");
        assert!(req.query.contains(&("query".into(), "email:\"ab@x.com\"".into())));
    }

    #[test]
    fn contact_page_tolerates_missing_fields() {
        let page: ContactPage = serde_json::from_str(r#"{"data":[{"id":1}]}"#).unwrap();
        assert_eq!(page.total, None);
        assert_eq!(page.data.len(), 1);
    }
}
