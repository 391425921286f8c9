//! Resumable batch synchronization of CRM contacts into the mirror.
//!
//! - [`types`] - `SyncOptions`, `StartSyncOptions`, `InvocationOutcome`, limits
//! - [`progress`] - `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`jobs`] - job persistence with compare-and-set writes
//! - [`SyncController`] - the per-invocation batch loop

mod controller;
pub mod jobs;
mod progress;
mod types;

pub use controller::SyncController;
pub use jobs::{ABANDONED_ERROR, JobError, find_stale as find_stale_jobs, mark_abandoned};
pub use progress::{ProgressCallback, SyncProgress, backoff_hook, emit};
pub use types::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCHES_PER_INVOCATION, DEFAULT_STALE_AFTER, InvocationOutcome,
    MAX_BATCH_SIZE, StartSyncOptions, StopReason, SyncOptions,
};
