//! Shared fakes for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel};
use uuid::Uuid;

use crate::auth::{AccessGrant, CredentialSupplier, RestSession, SessionExchange};
use crate::entity::crm_token::Model as TokenRecord;
use crate::oauth::OAuthError;

pub(crate) const REST_BASE: &str = "https://rest.example.com/rest-services/corp/";

pub(crate) async fn memory_db() -> Arc<DatabaseConnection> {
    Arc::new(
        crate::connect_and_migrate("sqlite::memory:")
            .await
            .expect("in-memory db"),
    )
}

/// Insert a token that expires `expires_in_secs` from now (negative: already expired).
pub(crate) async fn seed_token(db: &DatabaseConnection, expires_in_secs: i64) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        id: Uuid::new_v4(),
        access_token: "at-old".into(),
        refresh_token: Some("rt-old".into()),
        rest_base_url: REST_BASE.into(),
        session_token: "session-old".into(),
        expires_at: Some((now + chrono::Duration::seconds(expires_in_secs)).fixed_offset()),
        created_at: now.fixed_offset(),
    }
    .into_active_model()
    .insert(db)
    .await
    .expect("seed token")
}

pub(crate) struct FakeSession {
    pub logins: AtomicUsize,
    fail_login: bool,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicUsize::new(0),
            fail_login: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicUsize::new(0),
            fail_login: true,
        })
    }
}

#[async_trait]
impl SessionExchange for FakeSession {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: Option<&str>,
    ) -> Result<AccessGrant, OAuthError> {
        Ok(AccessGrant {
            access_token: format!("at-from-{code}"),
            refresh_token: Some("rt-from-code".into()),
            expires_in: Some(600),
        })
    }

    async fn rest_login(&self, access_token: &str) -> Result<RestSession, OAuthError> {
        if self.fail_login {
            return Err(OAuthError::rejected("login", 500, "down"));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RestSession {
            session_token: format!("session-{n}-{access_token}"),
            rest_url: REST_BASE.into(),
        })
    }
}

pub(crate) struct FakeSupplier {
    name: &'static str,
    calls: AtomicUsize,
    succeed: bool,
    delay: Duration,
}

impl FakeSupplier {
    pub fn new(name: &'static str, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            succeed,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            succeed: true,
            delay: Duration::from_millis(50),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSupplier for FakeSupplier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn obtain(&self, _current: &TokenRecord) -> Result<AccessGrant, OAuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.succeed {
            Ok(AccessGrant {
                access_token: format!("{}-at-{n}", self.name),
                refresh_token: None,
                expires_in: Some(3600),
            })
        } else {
            Err(OAuthError::provider("invalid_grant"))
        }
    }
}

pub(crate) fn as_suppliers(list: &[Arc<FakeSupplier>]) -> Vec<Arc<dyn CredentialSupplier>> {
    list.iter()
        .map(|s| Arc::clone(s) as Arc<dyn CredentialSupplier>)
        .collect()
}
