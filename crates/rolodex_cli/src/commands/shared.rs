use std::sync::Arc;

use async_trait::async_trait;
use rolodex::client::BackoffHook;
use rolodex::http::reqwest_transport::ReqwestTransport;
use rolodex::{
    ContactLookup, ContactPage, ContactSource, CrmAuthClient, CrmClient, CrmError, HttpTransport,
    MirrorService, TokenStore,
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Handles to the CRM integration built from the configuration.
pub(crate) struct CrmHandles {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) auth: Arc<CrmAuthClient>,
    pub(crate) tokens: Arc<TokenStore>,
}

/// Build the auth client and token store.
///
/// Fails if the CRM endpoints are not configured.
pub(crate) fn connect_crm(
    config: &Config,
    db: &Arc<DatabaseConnection>,
) -> Result<CrmHandles, Box<dyn std::error::Error>> {
    let endpoints = config.endpoints()?;
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::with_timeout(
        config.client_options().request_timeout,
    )?);
    let auth = Arc::new(CrmAuthClient::new(
        Arc::clone(&transport),
        Arc::new(config.settings()),
        endpoints,
    ));
    let tokens = Arc::new(TokenStore::for_client(Arc::clone(db), Arc::clone(&auth)));
    Ok(CrmHandles {
        transport,
        auth,
        tokens,
    })
}

/// Build the service used by every command.
///
/// Without configured endpoints the service still answers job and mirror
/// queries; anything that needs the CRM fails with "not configured".
pub(crate) fn build_service(
    config: &Config,
    db: Arc<DatabaseConnection>,
    cancel: CancellationToken,
    on_backoff: Option<BackoffHook>,
) -> Result<MirrorService, Box<dyn std::error::Error>> {
    let service = if config.endpoints().is_ok() {
        let crm = connect_crm(config, &db)?;
        let mut client = CrmClient::new(crm.transport, crm.tokens, config.client_options())
            .with_cancellation(cancel.clone());
        if let Some(hook) = on_backoff {
            client = client.with_backoff_hook(hook);
        }
        MirrorService::from_client(db, client)
    } else {
        tracing::debug!("CRM endpoints not configured, running offline");
        let offline = Arc::new(OfflineCrm);
        MirrorService::new(db, offline.clone(), offline)
    };

    Ok(service
        .with_sync_defaults(config.sync_options())
        .with_overlap_options(config.overlap_options())
        .with_cancellation(cancel))
}

/// Stand-in CRM for installs that have not configured one.
struct OfflineCrm;

#[async_trait]
impl ContactSource for OfflineCrm {
    async fn fetch_page(
        &self,
        _start: i64,
        _count: i64,
        _include_deleted: bool,
    ) -> rolodex::error::Result<ContactPage> {
        Err(CrmError::AuthNotConfigured)
    }
}

#[async_trait]
impl ContactLookup for OfflineCrm {
    async fn email_exists(&self, _email: &str) -> rolodex::error::Result<bool> {
        Err(CrmError::AuthNotConfigured)
    }
}
