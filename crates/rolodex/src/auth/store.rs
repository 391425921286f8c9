//! Persisted credential set with single-flight refresh.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, QueryOrder,
    TransactionTrait,
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::entity::crm_token::{self, Model as TokenRecord};
use crate::error::{CrmError, Result};
use crate::oauth::{DEFAULT_EXPIRY_BUFFER_SECS, compute_expires_at, token_is_expired};

use super::client::{AccessGrant, CrmAuthClient, RestSession, SessionExchange};
use super::suppliers::{CredentialSupplier, default_suppliers};

type SharedOutcome = Option<std::result::Result<TokenRecord, Arc<CrmError>>>;

/// Owner of the single live [`TokenRecord`].
///
/// Concurrent callers that find the token expired share one refresh: the
/// first becomes the leader, the rest wait on its outcome.
pub struct TokenStore {
    db: Arc<DatabaseConnection>,
    session: Arc<dyn SessionExchange>,
    suppliers: Vec<Arc<dyn CredentialSupplier>>,
    expiry_buffer_secs: i64,
    inflight: Mutex<Option<watch::Receiver<SharedOutcome>>>,
}

impl TokenStore {
    pub fn new(
        db: Arc<DatabaseConnection>,
        session: Arc<dyn SessionExchange>,
        suppliers: Vec<Arc<dyn CredentialSupplier>>,
    ) -> Self {
        Self {
            db,
            session,
            suppliers,
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
            inflight: Mutex::new(None),
        }
    }

    /// Store wired to the CRM auth client with the default supplier chain.
    pub fn for_client(db: Arc<DatabaseConnection>, client: Arc<CrmAuthClient>) -> Self {
        let suppliers = default_suppliers(&client);
        Self::new(db, client, suppliers)
    }

    #[must_use]
    pub fn with_expiry_buffer(mut self, secs: i64) -> Self {
        self.expiry_buffer_secs = secs;
        self
    }

    /// The stored record, if any.
    pub async fn load(&self) -> std::result::Result<Option<TokenRecord>, DbErr> {
        crm_token::Entity::find()
            .order_by_desc(crm_token::Column::CreatedAt)
            .one(self.db.as_ref())
            .await
    }

    /// Whether the record should be refreshed before use.
    pub fn needs_refresh(&self, record: &TokenRecord) -> bool {
        token_is_expired(record.expires_at, Utc::now(), self.expiry_buffer_secs)
    }

    /// A usable credential set, refreshing it first if it has expired.
    pub async fn get_valid_token(&self) -> Result<TokenRecord> {
        let record = self.load().await?.ok_or(CrmError::AuthNotConfigured)?;
        if !self.needs_refresh(&record) {
            return Ok(record);
        }

        tracing::info!("CRM token expired, refreshing");
        self.refresh(&record).await
    }

    /// Refresh even though `stale` still looks valid (the CRM refused it).
    ///
    /// Returns the stored record without a remote call if it already differs
    /// from `stale`.
    pub async fn force_refresh(&self, stale: &TokenRecord) -> Result<TokenRecord> {
        tracing::info!("CRM refused session, forcing token refresh");
        self.refresh(stale).await
    }

    /// Complete an authorization-code flow and persist the resulting session.
    pub async fn save_from_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenRecord> {
        let grant = self.session.exchange_code(code, redirect_uri).await?;
        self.establish(grant).await
    }

    /// REST-login with a fresh grant and persist the result.
    pub async fn establish(&self, grant: AccessGrant) -> Result<TokenRecord> {
        let session = self.session.rest_login(&grant.access_token).await?;
        let record = self.replace(grant, session, None).await?;
        tracing::info!(rest_url = %record.rest_base_url, "CRM session established");
        Ok(record)
    }

    /// Delete the stored credentials.
    pub async fn clear(&self) -> std::result::Result<u64, DbErr> {
        let res = crm_token::Entity::delete_many().exec(self.db.as_ref()).await?;
        Ok(res.rows_affected)
    }

    async fn refresh(&self, stale: &TokenRecord) -> Result<TokenRecord> {
        let (mut rx, leader) = {
            let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(rx) => (rx.clone(), None),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        let Some(tx) = leader else {
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|v| v.clone());
            return match outcome {
                Some(Ok(record)) => Ok(record),
                Some(Err(err)) => Err(replay(&err)),
                None => Err(CrmError::auth_expired("token refresh was interrupted")),
            };
        };

        let _clear = InflightGuard(&self.inflight);
        let result = self.refresh_now(stale).await.map_err(Arc::new);
        tx.send_replace(Some(result.clone()));
        result.map_err(|err| replay(&err))
    }

    async fn refresh_now(&self, stale: &TokenRecord) -> Result<TokenRecord> {
        let current = self.load().await?.ok_or(CrmError::AuthNotConfigured)?;
        if current.id != stale.id {
            tracing::debug!("token already refreshed elsewhere");
            return Ok(current);
        }

        let mut failures = Vec::new();
        for supplier in &self.suppliers {
            let grant = match supplier.obtain(&current).await {
                Ok(grant) => grant,
                Err(e) => {
                    tracing::warn!(supplier = supplier.name(), error = %e, "credential supplier failed");
                    failures.push(format!("{}: {e}", supplier.name()));
                    continue;
                }
            };

            match self.session.rest_login(&grant.access_token).await {
                Ok(session) => {
                    let record = self
                        .replace(grant, session, current.refresh_token.clone())
                        .await?;
                    tracing::info!(supplier = supplier.name(), "CRM token refreshed");
                    return Ok(record);
                }
                Err(e) => {
                    tracing::warn!(supplier = supplier.name(), error = %e, "REST login failed");
                    failures.push(format!("{} (REST login): {e}", supplier.name()));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no credential suppliers configured".to_string());
        }
        Err(CrmError::auth_expired(failures.join("; ")))
    }

    /// Replace the stored record wholesale inside one transaction.
    async fn replace(
        &self,
        grant: AccessGrant,
        session: RestSession,
        previous_refresh_token: Option<String>,
    ) -> std::result::Result<TokenRecord, DbErr> {
        let now = Utc::now();
        let record = TokenRecord {
            id: Uuid::new_v4(),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh_token),
            rest_base_url: session.rest_url,
            session_token: session.session_token,
            expires_at: compute_expires_at(now, grant.expires_in),
            created_at: now.fixed_offset(),
        };

        let txn = self.db.begin().await?;
        crm_token::Entity::delete_many().exec(&txn).await?;
        let saved = record.into_active_model().insert(&txn).await?;
        txn.commit().await?;
        Ok(saved)
    }
}

struct InflightGuard<'a>(&'a Mutex<Option<watch::Receiver<SharedOutcome>>>);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Rebuild a shared refresh failure for a waiting caller.
fn replay(err: &CrmError) -> CrmError {
    match err {
        CrmError::AuthNotConfigured => CrmError::AuthNotConfigured,
        CrmError::AuthExpired { message } => CrmError::auth_expired(message.clone()),
        other => CrmError::auth_expired(other.to_string()),
    }
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use super::*;
    use crate::testing::{FakeSession, FakeSupplier, as_suppliers, memory_db as db, seed_token};
    use sea_orm::PaginatorTrait;
    use std::sync::atomic::Ordering;

    async fn seed(db: &DatabaseConnection, expires_in_secs: i64) -> TokenRecord {
        seed_token(db, expires_in_secs).await
    }

    #[tokio::test]
    async fn missing_record_is_not_configured() {
        let store = TokenStore::new(db().await, FakeSession::new(), Vec::new());
        let err = store.get_valid_token().await.expect_err("no record");
        assert!(matches!(err, CrmError::AuthNotConfigured));
    }

    #[tokio::test]
    async fn valid_record_is_returned_without_refresh() {
        let db = db().await;
        let seeded = seed(&db, 3600).await;
        let supplier = FakeSupplier::new("refresh", true);
        let store = TokenStore::new(db, FakeSession::new(), as_suppliers(&[supplier.clone()]));

        let token = store.get_valid_token().await.expect("valid");
        assert_eq!(token.id, seeded.id);
        assert_eq!(supplier.calls(), 0);
    }

    #[tokio::test]
    async fn token_inside_buffer_is_refreshed() {
        let db = db().await;
        seed(&db, 30).await;
        let supplier = FakeSupplier::new("refresh", true);
        let store = TokenStore::new(db, FakeSession::new(), as_suppliers(&[supplier.clone()]));

        let token = store.get_valid_token().await.expect("refreshed");
        assert_eq!(token.access_token, "refresh-at-1");
        assert_eq!(supplier.calls(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_next_supplier_and_replaces_record() {
        let db = db().await;
        let old = seed(&db, -10).await;
        let refresh = FakeSupplier::new("refresh", false);
        let password = FakeSupplier::new("password", true);
        let store = TokenStore::new(
            db.clone(),
            FakeSession::new(),
            as_suppliers(&[refresh.clone(), password.clone()]),
        );

        let token = store.get_valid_token().await.expect("fallback succeeds");
        assert_ne!(token.id, old.id);
        assert_eq!(token.access_token, "password-at-1");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(token.session_token, "session-1-password-at-1");
        assert!(token.expires_at.is_some());
        assert_eq!(refresh.calls(), 1);
        assert_eq!(password.calls(), 1);

        let rows = crm_token::Entity::find().count(db.as_ref()).await.unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn all_suppliers_failing_is_auth_expired_and_keeps_old_record() {
        let db = db().await;
        let old = seed(&db, -10).await;
        let store = TokenStore::new(
            db,
            FakeSession::new(),
            as_suppliers(&[FakeSupplier::new("refresh", false)]),
        );

        let err = store.get_valid_token().await.expect_err("should fail");
        match err {
            CrmError::AuthExpired { message } => assert!(message.contains("refresh")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.load().await.unwrap().map(|r| r.id), Some(old.id));
    }

    #[tokio::test]
    async fn rest_login_failure_never_writes_partial_record() {
        let db = db().await;
        let old = seed(&db, -10).await;
        let session = FakeSession::failing();
        let store = TokenStore::new(
            db,
            session,
            as_suppliers(&[FakeSupplier::new("refresh", true)]),
        );

        let err = store.get_valid_token().await.expect_err("login fails");
        assert!(err.is_auth_failure());
        let stored = store.load().await.unwrap().expect("old record kept");
        assert_eq!(stored.id, old.id);
        assert_eq!(stored.access_token, "at-old");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let db = db().await;
        seed(&db, -10).await;
        let supplier = FakeSupplier::slow("refresh");
        let session = FakeSession::new();
        let store = Arc::new(TokenStore::new(
            db,
            session.clone(),
            as_suppliers(&[supplier.clone()]),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.get_valid_token().await }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().expect("refresh shared"));
        }

        assert_eq!(supplier.calls(), 1);
        assert_eq!(session.logins.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t.id == tokens[0].id));
        assert!(tokens.iter().all(|t| t.access_token == "refresh-at-1"));
    }

    #[tokio::test]
    async fn force_refresh_with_outdated_record_returns_current() {
        let db = db().await;
        let stale = seed(&db, 3600).await;
        let supplier = FakeSupplier::new("refresh", true);
        let store = TokenStore::new(db, FakeSession::new(), as_suppliers(&[supplier.clone()]));

        let fresh = store.force_refresh(&stale).await.expect("forced");
        assert_ne!(fresh.id, stale.id);
        assert_eq!(supplier.calls(), 1);

        let again = store.force_refresh(&stale).await.expect("already refreshed");
        assert_eq!(again.id, fresh.id);
        assert_eq!(supplier.calls(), 1);
    }

    #[tokio::test]
    async fn save_from_code_and_clear() {
        let db = db().await;
        let store = TokenStore::new(db, FakeSession::new(), Vec::new());

        let record = store
            .save_from_code("abc", Some("https://app.example.com/cb"))
            .await
            .expect("saved");
        assert_eq!(record.access_token, "at-from-abc");
        assert_eq!(record.refresh_token.as_deref(), Some("rt-from-code"));
        assert_eq!(
            store.load().await.unwrap().map(|r| r.id),
            Some(record.id)
        );

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(matches!(
            store.get_valid_token().await,
            Err(CrmError::AuthNotConfigured)
        ));
    }
}
