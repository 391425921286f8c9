//! Rolodex - resumable mirroring of CRM contacts.
//!
//! This library keeps a local copy of a CRM's contacts current through
//! batch sync jobs that persist their cursor after every batch, refreshes
//! the OAuth and REST session credentials they run on, and checks candidate
//! contacts for existence in the CRM before export.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends.
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//! - `server` - axum routes for the OAuth callback ([`oauth::callback`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rolodex::{MirrorService, StartSyncOptions, connect_and_migrate};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://rolodex.db?mode=rwc").await?);
//! let service = MirrorService::from_client(db, client);
//!
//! let job = service.start_sync(Some("ops"), &StartSyncOptions::default()).await?;
//! let outcome = service.run_to_completion(job.id, None).await?;
//! println!("{} contacts mirrored", outcome.job.total_synced);
//! ```

pub mod auth;
pub mod client;
pub mod db;
pub mod entity;
pub mod error;
pub mod http;
pub mod mirror;
pub mod oauth;
pub mod overlap;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod testing;

pub use auth::{CrmAuthClient, CrmEndpoints, SettingsStore, StaticSettings, TokenStore};
pub use client::{ContactLookup, ContactPage, ContactSource, CrmClient, CrmClientOptions};
pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use error::CrmError;
pub use http::{HttpError, HttpTransport};
pub use mirror::{DbMirrorSink, MirrorError, MirrorSink, UpsertOutcome};
pub use oauth::OAuthError;
pub use overlap::{
    CandidateContact, EnrichmentRunStore, OverlapChecker, OverlapError, OverlapOptions,
    OverlapResult, RunStoreError, StaticRunStore,
};
pub use rate_limit::ApiRateLimiter;
pub use retry::{RetryConfig, RetryPolicy};
pub use service::{MirrorService, MirrorStats, ServiceError};
pub use sync::{
    InvocationOutcome, JobError, StartSyncOptions, StopReason, SyncController, SyncOptions,
    SyncProgress,
};
