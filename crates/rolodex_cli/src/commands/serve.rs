use std::sync::Arc;

use rolodex::oauth::{CallbackState, callback_router};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::commands::shared::connect_crm;
use crate::config::Config;

pub(crate) async fn handle_serve(
    bind: Option<String>,
    config: &Config,
    db: Arc<DatabaseConnection>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let crm = connect_crm(config, &db)?;
    let state = Arc::new(CallbackState {
        tokens: crm.tokens,
        auth: crm.auth,
        frontend_url: config.server.frontend_url.clone(),
        redirect_uri: config.crm.redirect_uri.clone(),
    });
    let app = callback_router(state).layer(TraceLayer::new_for_http());

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| format!("Cannot listen on {}: {}", bind, e))?;
    tracing::info!(address = %bind, "Serving OAuth callback");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
