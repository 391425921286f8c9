//! Credential suppliers tried in order when the stored token needs replacing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::crm_token::Model as TokenRecord;
use crate::oauth::OAuthError;

use super::client::{AccessGrant, CrmAuthClient, SessionExchange};
use super::settings::password_credentials;

/// One way of obtaining a fresh access grant.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Obtain a new grant given the currently stored record.
    async fn obtain(&self, current: &TokenRecord) -> Result<AccessGrant, OAuthError>;
}

/// The OAuth refresh-token grant.
pub struct RefreshTokenGrant {
    client: Arc<CrmAuthClient>,
}

impl RefreshTokenGrant {
    pub fn new(client: Arc<CrmAuthClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSupplier for RefreshTokenGrant {
    fn name(&self) -> &'static str {
        "refresh_token"
    }

    async fn obtain(&self, current: &TokenRecord) -> Result<AccessGrant, OAuthError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::Configuration("no refresh token stored".into()))?;
        self.client.refresh(refresh_token).await
    }
}

/// Unattended re-login with the stored API-user username and password.
pub struct PasswordLogin {
    client: Arc<CrmAuthClient>,
}

impl PasswordLogin {
    pub fn new(client: Arc<CrmAuthClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSupplier for PasswordLogin {
    fn name(&self) -> &'static str {
        "password_login"
    }

    async fn obtain(&self, _current: &TokenRecord) -> Result<AccessGrant, OAuthError> {
        let credentials = password_credentials(self.client.settings())
            .await
            .ok_or_else(|| {
                OAuthError::Configuration("no fallback username/password configured".into())
            })?;
        let code = self.client.password_authorize(&credentials).await?;
        self.client.exchange_code(&code, None).await
    }
}

/// The standard supplier chain: refresh grant first, then password login.
pub fn default_suppliers(client: &Arc<CrmAuthClient>) -> Vec<Arc<dyn CredentialSupplier>> {
    vec![
        Arc::new(RefreshTokenGrant::new(Arc::clone(client))),
        Arc::new(PasswordLogin::new(Arc::clone(client))),
    ]
}
