//! CRM credentials: settings, OAuth/REST login client, supplier chain, and
//! the persisted token store.

pub mod client;
pub mod settings;
pub mod store;
pub mod suppliers;

pub use client::{AccessGrant, CrmAuthClient, CrmEndpoints, RestSession, SessionExchange};
pub use settings::{
    ClientCredentials, PasswordCredentials, SettingsStore, StaticSettings, client_credentials,
    password_credentials,
};
pub use store::TokenStore;
pub use suppliers::{CredentialSupplier, PasswordLogin, RefreshTokenGrant, default_suppliers};
