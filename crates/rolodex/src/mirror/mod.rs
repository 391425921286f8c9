//! Local mirror of CRM contacts.
//!
//! - [`sink`] - [`MirrorSink`] trait and the database-backed [`DbMirrorSink`]
//! - [`query`] - read helpers
//! - [`record`] - field extraction and email normalization

mod errors;
pub mod query;
pub mod record;
pub mod sink;

pub use errors::{MirrorError, Result};
pub use record::{ContactFields, normalize_email};
pub use sink::{DbMirrorSink, MirrorSink, UpsertOutcome};
