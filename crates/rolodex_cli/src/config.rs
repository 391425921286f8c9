//! Configuration file support for rolodex.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `ROLODEX_`, sections separated by
//!    `__`, e.g. `ROLODEX_CRM__CLIENT_ID`)
//! 3. Config file (./rolodex.toml, then ~/.config/rolodex/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/rolodex/rolodex.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/rolodex/rolodex.db"  # optional, this is the default
//!
//! [crm]
//! auth_url = "https://auth.crm.example.com"
//! login_url = "https://rest.crm.example.com/rest-services"
//! client_id = "..."       # or ROLODEX_CRM__CLIENT_ID
//! client_secret = "..."   # or ROLODEX_CRM__CLIENT_SECRET
//! username = "api-user"   # optional unattended re-login
//! password = "..."
//! redirect_uri = "https://rolodex.example.com/oauth/callback"
//! requests_per_second = 5
//! request_timeout_secs = 30
//!
//! [sync]
//! batch_size = 200
//! max_batches_per_invocation = 10
//! include_deleted = false
//! stale_after_secs = 900
//!
//! [overlap]
//! concurrency = 5
//! delay_ms = 250
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! frontend_url = "http://localhost:3000/settings"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use rolodex::auth::settings::keys;
use rolodex::client::CrmClientOptions;
use rolodex::{CrmEndpoints, OverlapOptions, SettingsStore, SyncOptions};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub crm: CrmConfig,
    pub sync: SyncConfig,
    pub overlap: OverlapConfig,
    pub server: ServerConfig,
}

/// Database configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    pub url: Option<String>,
}

/// CRM connection settings and credentials.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    /// OAuth server base URL.
    pub auth_url: Option<String>,
    /// REST login server base URL.
    pub login_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// API user for unattended re-login when the refresh token is revoked.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Redirect URI registered for the OAuth callback.
    pub redirect_uri: Option<String>,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            auth_url: None,
            login_url: None,
            client_id: None,
            client_secret: None,
            username: None,
            password: None,
            redirect_uri: None,
            requests_per_second: rolodex::rate_limit::DEFAULT_REQUESTS_PER_SECOND,
            request_timeout_secs: rolodex::client::DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl std::fmt::Debug for CrmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmConfig")
            .field("auth_url", &self.auth_url)
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("requests_per_second", &self.requests_per_second)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Defaults for new sync jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: u32,
    pub max_batches_per_invocation: u32,
    pub include_deleted: bool,
    /// Heartbeat age after which a running job counts as abandoned.
    pub stale_after_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let defaults = SyncOptions::default();
        Self {
            batch_size: defaults.batch_size,
            max_batches_per_invocation: defaults.max_batches_per_invocation,
            include_deleted: defaults.include_deleted,
            stale_after_secs: defaults.stale_after.as_secs(),
        }
    }
}

/// Overlap check tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlapConfig {
    pub concurrency: usize,
    pub delay_ms: u64,
    pub max_lookups: Option<usize>,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        let defaults = OverlapOptions::default();
        Self {
            concurrency: defaults.concurrency,
            delay_ms: defaults.batch_delay.as_millis() as u64,
            max_lookups: defaults.max_lookups,
        }
    }
}

/// OAuth callback server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Where the operator is sent after connecting.
    pub frontend_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            frontend_url: "http://localhost:3000/settings".to_string(),
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/rolodex/config.toml)
    /// 3. Local config file (./rolodex.toml)
    /// 4. Environment variables with ROLODEX_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!("Loading config from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("rolodex.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./rolodex.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., ROLODEX_CRM__CLIENT_ID -> crm.client_id
        builder = builder.add_source(environment());

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// `mode=rwc` creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("rolodex.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rolodex").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/rolodex` or `~/.local/state/rolodex`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rolodex").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }

    /// CRM server URLs, if both are configured.
    pub fn endpoints(&self) -> Result<CrmEndpoints, String> {
        match (&self.crm.auth_url, &self.crm.login_url) {
            (Some(auth), Some(login)) => Ok(CrmEndpoints::new(auth, login)),
            _ => Err(
                "CRM endpoints are not configured; set crm.auth_url and crm.login_url \
                 (or ROLODEX_CRM__AUTH_URL / ROLODEX_CRM__LOGIN_URL)"
                    .to_string(),
            ),
        }
    }

    pub fn client_options(&self) -> CrmClientOptions {
        CrmClientOptions {
            requests_per_second: self.crm.requests_per_second,
            request_timeout: Duration::from_secs(self.crm.request_timeout_secs.max(1)),
            ..CrmClientOptions::default()
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.sync.batch_size,
            max_batches_per_invocation: self.sync.max_batches_per_invocation,
            include_deleted: self.sync.include_deleted,
            stale_after: Duration::from_secs(self.sync.stale_after_secs),
        }
    }

    pub fn overlap_options(&self) -> OverlapOptions {
        OverlapOptions {
            concurrency: self.overlap.concurrency,
            batch_delay: Duration::from_millis(self.overlap.delay_ms),
            max_lookups: self.overlap.max_lookups,
        }
    }

    /// CRM credentials as a [`SettingsStore`].
    pub fn settings(&self) -> ConfigSettings {
        ConfigSettings {
            crm: self.crm.clone(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("ROLODEX")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// [`SettingsStore`] backed by the `[crm]` section.
#[derive(Debug, Clone)]
pub struct ConfigSettings {
    crm: CrmConfig,
}

#[async_trait]
impl SettingsStore for ConfigSettings {
    async fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            keys::CLIENT_ID => &self.crm.client_id,
            keys::CLIENT_SECRET => &self.crm.client_secret,
            keys::USERNAME => &self.crm.username,
            keys::PASSWORD => &self.crm.password,
            _ => return None,
        };
        value.clone()
    }
}
