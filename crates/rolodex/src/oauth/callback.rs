//! HTTP routes for connecting the CRM integration.
//!
//! `GET /oauth/authorize` sends the operator to the CRM's consent page;
//! `GET /oauth/callback` receives the authorization code, exchanges it for a
//! token and a REST session, stores the result, and redirects back to the
//! front-end with `?crm=connected` or `?crm_error=<message>`.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use serde::Deserialize;
use url::Url;

use super::error::OAuthError;
use crate::auth::{CrmAuthClient, SessionExchange, TokenStore};

/// Query parameters received in the OAuth callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// The authorization code (on success).
    pub code: Option<String>,
    /// Error code (on failure).
    pub error: Option<String>,
    /// Error description (on failure).
    pub error_description: Option<String>,
}

/// Shared state for the callback routes.
pub struct CallbackState {
    pub tokens: Arc<TokenStore>,
    pub auth: Arc<CrmAuthClient>,
    /// Where the operator lands after the flow finishes.
    pub frontend_url: String,
    /// Redirect URI registered with the CRM, if it must be sent explicitly.
    pub redirect_uri: Option<String>,
}

/// Build the router serving `/oauth/authorize` and `/oauth/callback`.
pub fn callback_router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/oauth/authorize", get(handle_authorize))
        .route("/oauth/callback", get(handle_callback))
        .with_state(state)
}

async fn handle_authorize(State(state): State<Arc<CallbackState>>) -> Redirect {
    match state.auth.authorize_url(state.redirect_uri.as_deref()).await {
        Ok(url) => Redirect::to(&url),
        Err(e) => {
            tracing::warn!(error = %e, "cannot build CRM authorize URL");
            Redirect::to(&frontend_redirect(&state.frontend_url, Err(&e.to_string())))
        }
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let outcome = connect(&state, params).await;
    if let Err(message) = &outcome {
        tracing::warn!(error = %message, "CRM connection failed");
    }
    Redirect::to(&frontend_redirect(
        &state.frontend_url,
        outcome.as_ref().map(|_| ()).map_err(String::as_str),
    ))
}

async fn connect(state: &CallbackState, params: CallbackParams) -> Result<(), String> {
    let code = process_callback(params).map_err(|e| e.to_string())?;
    let grant = state
        .auth
        .exchange_code(&code, state.redirect_uri.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    let record = state
        .tokens
        .establish(grant)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(expires_at = ?record.expires_at, "CRM integration connected");
    Ok(())
}

/// Extract the authorization code, or the error the CRM reported.
pub fn process_callback(params: CallbackParams) -> Result<String, OAuthError> {
    if let Some(error) = params.error {
        if error == "access_denied" {
            return Err(OAuthError::AccessDenied);
        }
        let message = params.error_description.unwrap_or(error);
        return Err(OAuthError::provider(message));
    }

    params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| OAuthError::Parse("Missing authorization code in callback".into()))
}

/// Front-end URL carrying `crm=connected` or `crm_error=<message>`.
pub fn frontend_redirect(frontend_url: &str, outcome: Result<(), &str>) -> String {
    let (key, value) = match outcome {
        Ok(()) => ("crm", "connected"),
        Err(message) => ("crm_error", message),
    };

    match Url::parse(frontend_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(key, value);
            url.into()
        }
        Err(_) => {
            let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
            let separator = if frontend_url.contains('?') { '&' } else { '?' };
            format!("{frontend_url}{separator}{key}={encoded}")
        }
    }
}


#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod connect_tests {
    use super::*;
    use crate::auth::client::CrmEndpoints;
    use crate::auth::settings::{StaticSettings, keys};
    use crate::http::{HttpMethod, MockTransport, json_response};
    use crate::testing::{memory_db, seed_token};
    use axum::http::header::LOCATION;
    use axum::response::IntoResponse;
    use sea_orm::DatabaseConnection;

    const FRONTEND: &str = "https://app.example.com/settings";
    const TOKEN_URL: &str = "https://auth.example.com/oauth/token";
    const LOGIN_URL: &str = "https://login.example.com/login";

    fn callback_state(
        transport: &MockTransport,
        db: Arc<DatabaseConnection>,
    ) -> Arc<CallbackState> {
        let settings = StaticSettings::new()
            .with(keys::CLIENT_ID, "id")
            .with(keys::CLIENT_SECRET, "secret");
        let auth = Arc::new(CrmAuthClient::new(
            Arc::new(transport.clone()),
            Arc::new(settings),
            CrmEndpoints::new("https://auth.example.com", "https://login.example.com"),
        ));
        let tokens = Arc::new(TokenStore::for_client(db, Arc::clone(&auth)));
        Arc::new(CallbackState {
            tokens,
            auth,
            frontend_url: FRONTEND.into(),
            redirect_uri: None,
        })
    }

    async fn redirect_location(state: &Arc<CallbackState>, params: CallbackParams) -> String {
        let response = handle_callback(State(Arc::clone(state)), Query(params))
            .await
            .into_response();
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("redirect carries a location")
            .to_string()
    }

    fn with_code(code: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_callback_stores_session_and_reports_connected() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            TOKEN_URL,
            json_response(
                200,
                serde_json::json!({
                    "access_token": "at-new",
                    "refresh_token": "rt-new",
                    "expires_in": 600
                }),
            ),
        );
        transport.push_response(
            HttpMethod::Get,
            LOGIN_URL,
            json_response(
                200,
                serde_json::json!({
                    "BhRestToken": "session-new",
                    "restUrl": "https://rest.example.com/rest-services/corp/"
                }),
            ),
        );
        let state = callback_state(&transport, memory_db().await);

        let location = redirect_location(&state, with_code("code-1")).await;
        assert_eq!(location, format!("{FRONTEND}?crm=connected"));

        let stored = state.tokens.load().await.unwrap().expect("record stored");
        assert_eq!(stored.access_token, "at-new");
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
        assert_eq!(stored.session_token, "session-new");
        assert!(stored.expires_at.is_some());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(body.contains("code=code-1"));
    }

    #[tokio::test]
    async fn failed_exchange_reports_error_and_keeps_stored_record() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            TOKEN_URL,
            json_response(
                400,
                serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "Code expired"
                }),
            ),
        );
        let db = memory_db().await;
        let previous = seed_token(&db, 3600).await;
        let state = callback_state(&transport, db);

        let location = redirect_location(&state, with_code("stale-code")).await;
        assert!(location.starts_with(&format!("{FRONTEND}?crm_error=")));
        assert!(location.contains("Code+expired"));

        let stored = state.tokens.load().await.unwrap().expect("record kept");
        assert_eq!(stored.id, previous.id);
        assert_eq!(stored.access_token, "at-old");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn denied_consent_makes_no_calls() {
        let transport = MockTransport::new();
        let state = callback_state(&transport, memory_db().await);

        let params = CallbackParams {
            error: Some("access_denied".into()),
            ..Default::default()
        };
        let location = redirect_location(&state, params).await;

        assert!(location.starts_with(&format!("{FRONTEND}?crm_error=")));
        assert!(transport.requests().is_empty());
    }
}
