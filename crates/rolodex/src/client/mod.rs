//! Rate-limited client for the CRM REST API.
//!
//! Every call goes through [`CrmClient::call`]: the governor limiter paces
//! requests, each attempt runs under a timeout, 429 responses and network
//! failures are retried on separate budgets, and a 401 triggers one forced
//! token refresh.

mod types;

pub use types::{
    BackoffNotice, BackoffReason, CONTACT_FIELDS, ContactPage, CrmClientOptions, CrmRequest,
    DEFAULT_REQUEST_TIMEOUT,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::TokenStore;
use crate::entity::crm_token::Model as TokenRecord;
use crate::error::{CrmError, Result};
use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ApiRateLimiter;
use crate::retry::parse_retry_after;

use types::SearchResponse;

/// Source of paginated contact records.
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn fetch_page(&self, start: i64, count: i64, include_deleted: bool)
    -> Result<ContactPage>;
}

/// Existence lookup for a single email.
#[async_trait]
pub trait ContactLookup: Send + Sync {
    async fn email_exists(&self, email: &str) -> Result<bool>;
}

/// Callback invoked before each retry delay.
pub type BackoffHook = Arc<dyn Fn(BackoffNotice) + Send + Sync>;

/// Client for the CRM REST API.
#[derive(Clone)]
pub struct CrmClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    limiter: ApiRateLimiter,
    options: CrmClientOptions,
    cancel: CancellationToken,
    on_backoff: Option<BackoffHook>,
}

impl CrmClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        options: CrmClientOptions,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter: ApiRateLimiter::new(options.requests_per_second),
            options,
            cancel: CancellationToken::new(),
            on_backoff: None,
        }
    }

    /// Abort in-flight attempts and backoff sleeps when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_backoff_hook(mut self, hook: BackoffHook) -> Self {
        self.on_backoff = Some(hook);
        self
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Execute a request, returning the decoded JSON body.
    pub async fn call(&self, request: &CrmRequest) -> Result<Value> {
        let mut token = self.tokens.get_valid_token().await?;
        let mut rate_delays = self.options.retry.rate_limit.delays();
        let mut network_delays = self.options.retry.network.delays();
        let mut refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CrmError::Cancelled);
            }
            attempt += 1;

            let url = request_url(&token, request)?;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CrmError::Cancelled),
                outcome = self.send_once(url) => outcome,
            };

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    let Some(delay) = network_delays.next_delay(None) else {
                        return Err(CrmError::Unavailable {
                            message: e.to_string(),
                            attempts: attempt,
                        });
                    };
                    tracing::warn!(
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "CRM request failed, retrying"
                    );
                    self.back_off(BackoffReason::Network, attempt, delay).await?;
                    continue;
                }
            };

            match response.status {
                200..=299 => return decode(&response),
                429 => {
                    let hint = parse_retry_after(response.header("retry-after"));
                    let Some(delay) = rate_delays.next_delay(hint) else {
                        tracing::warn!(path = %request.path, attempts = attempt, "CRM rate limit budget exhausted");
                        return Err(CrmError::RateLimited { attempts: attempt });
                    };
                    tracing::warn!(
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "CRM rate limited, backing off"
                    );
                    self.back_off(BackoffReason::RateLimited, attempt, delay)
                        .await?;
                }
                401 if !refreshed => {
                    refreshed = true;
                    token = self.tokens.force_refresh(&token).await?;
                }
                401 => {
                    return Err(CrmError::auth_expired(
                        "CRM refused the session even after refresh",
                    ));
                }
                status => {
                    tracing::debug!(path = %request.path, status, "CRM rejected request");
                    return Err(CrmError::remote_rejected(status, &response.body_text()));
                }
            }
        }
    }

    /// Fetch one page of contacts ordered by id.
    pub async fn query_contacts(
        &self,
        start: i64,
        count: i64,
        include_deleted: bool,
    ) -> Result<ContactPage> {
        let body = self
            .call(&CrmRequest::contact_page(start, count, include_deleted))
            .await?;
        let mut page: ContactPage =
            serde_json::from_value(body).map_err(|e| CrmError::Decode(e.to_string()))?;
        if page.count == 0 {
            page.count = page.data.len() as i64;
        }
        tracing::debug!(start, requested = count, returned = page.data.len(), "fetched contact page");
        Ok(page)
    }

    /// Contacts whose email matches `email`.
    pub async fn search_contacts_by_email(&self, email: &str) -> Result<Vec<Value>> {
        Ok(self.search_by_email(email).await?.data)
    }

    async fn search_by_email(&self, email: &str) -> Result<SearchResponse> {
        let body = self.call(&CrmRequest::contact_by_email(email)).await?;
        serde_json::from_value(body).map_err(|e| CrmError::Decode(e.to_string()))
    }

    async fn send_once(&self, url: String) -> std::result::Result<HttpResponse, HttpError> {
        self.limiter.wait().await;
        let timeout = self.options.request_timeout;
        match tokio::time::timeout(timeout, self.transport.send(HttpRequest::get(url))).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout(timeout)),
        }
    }

    async fn back_off(&self, reason: BackoffReason, attempt: u32, delay: Duration) -> Result<()> {
        if let Some(hook) = &self.on_backoff {
            hook(BackoffNotice {
                reason,
                attempt,
                delay,
            });
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CrmError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[async_trait]
impl ContactSource for CrmClient {
    async fn fetch_page(
        &self,
        start: i64,
        count: i64,
        include_deleted: bool,
    ) -> Result<ContactPage> {
        self.query_contacts(start, count, include_deleted).await
    }
}

#[async_trait]
impl ContactLookup for CrmClient {
    async fn email_exists(&self, email: &str) -> Result<bool> {
        let found = self.search_by_email(email).await?;
        Ok(found.total.unwrap_or(0) > 0 || !found.data.is_empty())
    }
}

fn request_url(token: &TokenRecord, request: &CrmRequest) -> Result<String> {
    let pairs = request
        .query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(std::iter::once(("BhRestToken", token.session_token.as_str())));
    Url::parse_with_params(&token.rest_url(&request.path), pairs)
        .map(String::from)
        .map_err(|e| CrmError::Decode(format!("invalid REST URL: {e}")))
}

fn decode(response: &HttpResponse) -> Result<Value> {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|e| CrmError::Decode(e.to_string()))
}
