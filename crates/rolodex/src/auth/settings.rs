//! Settings collaborator supplying CRM credentials.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::oauth::OAuthError;

/// Well-known settings keys.
pub mod keys {
    pub const CLIENT_ID: &str = "crm.client_id";
    pub const CLIENT_SECRET: &str = "crm.client_secret";
    pub const USERNAME: &str = "crm.username";
    pub const PASSWORD: &str = "crm.password";
}

/// Read-only key/value settings owned by the embedding application.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
}

/// An in-memory [`SettingsStore`].
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// OAuth client registration.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Stored API-user credentials used when the refresh token is revoked.
#[derive(Clone)]
pub struct PasswordCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

async fn non_empty(store: &dyn SettingsStore, key: &str) -> Option<String> {
    store
        .get(key)
        .await
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load the client id and secret, failing if either is missing.
pub async fn client_credentials(store: &dyn SettingsStore) -> Result<ClientCredentials, OAuthError> {
    let client_id = non_empty(store, keys::CLIENT_ID)
        .await
        .ok_or_else(|| OAuthError::Configuration(format!("{} is not set", keys::CLIENT_ID)))?;
    let client_secret = non_empty(store, keys::CLIENT_SECRET)
        .await
        .ok_or_else(|| {
            OAuthError::Configuration(format!("{} is not set", keys::CLIENT_SECRET))
        })?;
    Ok(ClientCredentials {
        client_id,
        client_secret,
    })
}

/// Load the fallback username/password, if both are present.
pub async fn password_credentials(store: &dyn SettingsStore) -> Option<PasswordCredentials> {
    let username = non_empty(store, keys::USERNAME).await?;
    let password = non_empty(store, keys::PASSWORD).await?;
    Some(PasswordCredentials { username, password })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_credentials_require_both_values() {
        let store = StaticSettings::new().with(keys::CLIENT_ID, "id");
        let err = client_credentials(&store).await.expect_err("secret missing");
        assert!(err.to_string().contains("crm.client_secret"));

        let store = store.with(keys::CLIENT_SECRET, "secret");
        let creds = client_credentials(&store).await.expect("both set");
        assert_eq!(creds.client_id, "id");
        assert!(!format!("{creds:?}").contains("\"secret\""));
    }

    #[tokio::test]
    async fn blank_password_means_no_fallback() {
        let store: StaticSettings = [(keys::USERNAME, "api-user"), (keys::PASSWORD, "  ")]
            .into_iter()
            .collect();
        assert!(password_credentials(&store).await.is_none());
    }

    #[tokio::test]
    async fn password_credentials_are_redacted_in_debug() {
        let store = StaticSettings::new()
            .with(keys::USERNAME, "api-user")
            .with(keys::PASSWORD, "hunter2");
        let creds = password_credentials(&store).await.expect("both set");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("api-user"));
        assert!(!rendered.contains("hunter2"));
    }
}
