//! HTTP client for the CRM's OAuth and REST login endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::oauth::{OAuthError, normalize_host};

use super::settings::{PasswordCredentials, SettingsStore, client_credentials};

/// Base URLs of the CRM's authorization and login servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmEndpoints {
    pub auth_url: String,
    pub login_url: String,
}

impl CrmEndpoints {
    pub fn new(auth_url: &str, login_url: &str) -> Self {
        Self {
            auth_url: normalize_host(auth_url),
            login_url: normalize_host(login_url),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.auth_url)
    }

    fn authorize_url(&self) -> String {
        format!("{}/oauth/authorize", self.auth_url)
    }

    fn rest_login_url(&self) -> String {
        format!("{}/login", self.login_url)
    }
}

/// Access token (and optional rotated refresh token) issued by the token endpoint.
#[derive(Clone, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success(AccessGrant),
    Error(TokenErrorResponse),
}

/// A REST session: the session token plus the session-specific base URL.
#[derive(Clone)]
pub struct RestSession {
    pub session_token: String,
    pub rest_url: String,
}

impl std::fmt::Debug for RestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSession")
            .field("session_token", &"<redacted>")
            .field("rest_url", &self.rest_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct RestLoginResponse {
    #[serde(rename = "BhRestToken")]
    session_token: String,
    #[serde(rename = "restUrl")]
    rest_url: String,
}

/// The server side of establishing a session: code exchange and REST login.
#[async_trait]
pub trait SessionExchange: Send + Sync {
    /// Exchange an authorization code for an access grant.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<AccessGrant, OAuthError>;

    /// Map an access token to a REST session.
    async fn rest_login(&self, access_token: &str) -> Result<RestSession, OAuthError>;
}

/// Client for the CRM authorization server.
#[derive(Clone)]
pub struct CrmAuthClient {
    transport: Arc<dyn HttpTransport>,
    settings: Arc<dyn SettingsStore>,
    endpoints: CrmEndpoints,
}

impl CrmAuthClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        settings: Arc<dyn SettingsStore>,
        endpoints: CrmEndpoints,
    ) -> Self {
        Self {
            transport,
            settings,
            endpoints,
        }
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    pub fn endpoints(&self) -> &CrmEndpoints {
        &self.endpoints
    }

    /// Authorization URL an operator opens to connect the integration.
    pub async fn authorize_url(&self, redirect_uri: Option<&str>) -> Result<String, OAuthError> {
        let creds = client_credentials(self.settings()).await?;
        let mut params = vec![
            ("client_id", creds.client_id.as_str()),
            ("response_type", "code"),
        ];
        if let Some(uri) = redirect_uri {
            params.push(("redirect_uri", uri));
        }
        build_url(&self.endpoints.authorize_url(), &params)
    }

    /// Run the refresh-token grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, OAuthError> {
        let creds = client_credentials(self.settings()).await?;
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &creds.client_id),
            ("client_secret", &creds.client_secret),
        ])
        .await
    }

    /// Log in with stored API-user credentials and return the authorization code.
    ///
    /// The authorize endpoint answers a successful login with a redirect whose
    /// `Location` carries `code`; any other answer means the login failed.
    pub async fn password_authorize(
        &self,
        credentials: &PasswordCredentials,
    ) -> Result<String, OAuthError> {
        let creds = client_credentials(self.settings()).await?;
        let url = build_url(
            &self.endpoints.authorize_url(),
            &[
                ("client_id", creds.client_id.as_str()),
                ("response_type", "code"),
                ("action", "Login"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ],
        )?;

        let response = self.transport.send(HttpRequest::get(url)).await?;
        let location = match response.header("location") {
            Some(location) if (300..400).contains(&response.status) => location,
            _ if response.is_success() => {
                return Err(OAuthError::provider(
                    "password login did not redirect; credentials rejected",
                ));
            }
            _ => return Err(rejection("authorize", &response)),
        };

        code_from_location(location)
    }

    async fn token_request(&self, fields: &[(&str, &str)]) -> Result<AccessGrant, OAuthError> {
        let request = HttpRequest::post_form(self.endpoints.token_url(), fields);
        let response = self.transport.send(request).await?;

        let parsed = serde_json::from_slice::<TokenResponse>(&response.body);
        match (response.is_success(), parsed) {
            (_, Ok(TokenResponse::Error(err))) => match err.error.as_str() {
                "access_denied" => Err(OAuthError::AccessDenied),
                _ => Err(OAuthError::provider(
                    err.error_description.unwrap_or(err.error),
                )),
            },
            (true, Ok(TokenResponse::Success(grant))) => Ok(grant),
            (true, Err(e)) => Err(OAuthError::Parse(e.to_string())),
            (false, _) => Err(rejection("token", &response)),
        }
    }
}

#[async_trait]
impl SessionExchange for CrmAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<AccessGrant, OAuthError> {
        let creds = client_credentials(self.settings()).await?;
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
        ];
        if let Some(uri) = redirect_uri {
            fields.push(("redirect_uri", uri));
        }
        self.token_request(&fields).await
    }

    async fn rest_login(&self, access_token: &str) -> Result<RestSession, OAuthError> {
        let url = build_url(
            &self.endpoints.rest_login_url(),
            &[("version", "*"), ("access_token", access_token)],
        )?;
        let response = self.transport.send(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(rejection("login", &response));
        }

        let body: RestLoginResponse = serde_json::from_slice(&response.body)
            .map_err(|e| OAuthError::Parse(format!("REST login response: {e}")))?;
        Ok(RestSession {
            session_token: body.session_token,
            rest_url: body.rest_url,
        })
    }
}

fn build_url(base: &str, params: &[(&str, &str)]) -> Result<String, OAuthError> {
    Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| OAuthError::Configuration(format!("invalid URL {base}: {e}")))
}

fn rejection(endpoint: &'static str, response: &HttpResponse) -> OAuthError {
    let body = response.body_text();
    let message = body.lines().next().unwrap_or_default().trim().to_string();
    OAuthError::rejected(endpoint, response.status, message)
}

/// Pull `code` (or an OAuth `error`) out of a redirect `Location`.
fn code_from_location(location: &str) -> Result<String, OAuthError> {
    let url = Url::parse(location)
        .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(location)))
        .map_err(|e| OAuthError::Parse(format!("invalid redirect location: {e}")))?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) if !code.is_empty() => Ok(code),
        (_, Some(error)) => Err(OAuthError::provider(error)),
        _ => Err(OAuthError::Parse(
            "redirect location did not carry an authorization code".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::settings::{StaticSettings, keys};
    use crate::http::{HttpMethod, MockTransport, json_response};

    fn client(transport: &MockTransport) -> CrmAuthClient {
        let settings = StaticSettings::new()
            .with(keys::CLIENT_ID, "client-1")
            .with(keys::CLIENT_SECRET, "shh");
        CrmAuthClient::new(
            Arc::new(transport.clone()),
            Arc::new(settings),
            CrmEndpoints::new("auth.example.com", "https://rest.example.com/rest-services/"),
        )
    }

    fn redirect(location: &str) -> HttpResponse {
        HttpResponse {
            status: 302,
            headers: vec![("Location".to_string(), location.to_string())],
            body: Vec::new(),
        }
    }

    #[test]
    fn endpoints_are_normalized() {
        let endpoints = CrmEndpoints::new("auth.example.com/", "https://rest.example.com/rest-services/");
        assert_eq!(endpoints.token_url(), "https://auth.example.com/oauth/token");
        assert_eq!(
            endpoints.rest_login_url(),
            "https://rest.example.com/rest-services/login"
        );
    }

    #[tokio::test]
    async fn refresh_posts_grant_and_parses_tokens() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            "https://auth.example.com/oauth/token",
            json_response(
                200,
                serde_json::json!({
                    "access_token": "at-2",
                    "refresh_token": "rt-2",
                    "expires_in": 600,
                    "token_type": "Bearer"
                }),
            ),
        );

        let grant = client(&transport).refresh("rt-1").await.expect("refresh");
        assert_eq!(grant.access_token, "at-2");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(grant.expires_in, Some(600));

        let body = String::from_utf8(transport.requests()[0].body.clone()).unwrap();
        assert!(body.contains("grant_type=refresh_token"));
        assert!(body.contains("refresh_token=rt-1"));
        assert!(body.contains("client_secret=shh"));
    }

    #[tokio::test]
    async fn refresh_maps_invalid_grant_to_provider_error() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            "https://auth.example.com/oauth/token",
            json_response(
                400,
                serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "refresh token revoked"
                }),
            ),
        );

        let err = client(&transport).refresh("rt-1").await.expect_err("revoked");
        assert_eq!(err.to_string(), "CRM error: refresh token revoked");
        assert!(err.is_grant_rejected());
    }

    #[tokio::test]
    async fn token_endpoint_server_error_is_rejection() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            "https://auth.example.com/oauth/token",
            HttpResponse {
                status: 503,
                headers: Vec::new(),
                body: b"maintenance\nmore".to_vec(),
            },
        );

        let err = client(&transport).refresh("rt-1").await.expect_err("503");
        assert_eq!(err.to_string(), "token returned 503: maintenance");
    }

    #[tokio::test]
    async fn password_authorize_reads_code_from_location() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://auth.example.com/oauth/authorize",
            redirect("https://app.example.com/cb?code=abc%3D123&client_id=client-1"),
        );

        let creds = PasswordCredentials {
            username: "api-user".into(),
            password: "p&ss".into(),
        };
        let code = client(&transport)
            .password_authorize(&creds)
            .await
            .expect("code");
        assert_eq!(code, "abc=123");

        let sent = &transport.requests()[0].url;
        assert!(sent.contains("action=Login"));
        assert!(sent.contains("password=p%26ss"));
    }

    #[tokio::test]
    async fn password_authorize_without_redirect_is_rejected() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://auth.example.com/oauth/authorize",
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>login</html>".to_vec(),
            },
        );

        let creds = PasswordCredentials {
            username: "api-user".into(),
            password: "wrong".into(),
        };
        let err = client(&transport)
            .password_authorize(&creds)
            .await
            .expect_err("no redirect");
        assert!(err.is_grant_rejected());
    }

    #[tokio::test]
    async fn rest_login_returns_session() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://rest.example.com/rest-services/login",
            json_response(
                200,
                serde_json::json!({
                    "BhRestToken": "session-1",
                    "restUrl": "https://rest42.example.com/rest-services/corp/"
                }),
            ),
        );

        let session = client(&transport).rest_login("at-1").await.expect("login");
        assert_eq!(session.session_token, "session-1");
        assert_eq!(session.rest_url, "https://rest42.example.com/rest-services/corp/");
        assert!(transport.requests()[0].url.contains("access_token=at-1"));
        assert!(!format!("{session:?}").contains("session-1"));
    }

    #[tokio::test]
    async fn authorize_url_includes_redirect() {
        let transport = MockTransport::new();
        let url = client(&transport)
            .authorize_url(Some("https://app.example.com/oauth/callback"))
            .await
            .expect("url");
        assert!(url.starts_with("https://auth.example.com/oauth/authorize?client_id=client-1"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Foauth%2Fcallback"));
    }

    #[test]
    fn code_from_location_handles_errors_and_relative_urls() {
        assert_eq!(code_from_location("/cb?code=xyz").unwrap(), "xyz");
        let err = code_from_location("/cb?error=invalid_request&error_description=bad+password")
            .expect_err("error redirect");
        assert_eq!(err.to_string(), "CRM error: bad password");
        assert!(matches!(
            code_from_location("/cb?state=1"),
            Err(OAuthError::Parse(_))
        ));
    }
}
