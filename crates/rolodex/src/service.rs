//! Inbound control operations over sync jobs, the mirror, and overlap checks.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{ContactLookup, ContactSource, CrmClient};
use crate::entity::sync_job::Model as SyncJob;
use crate::error::CrmError;
use crate::mirror::{self, DbMirrorSink, MirrorSink};
use crate::overlap::{
    CandidateContact, EnrichmentRunStore, OverlapChecker, OverlapError, OverlapOptions,
    OverlapResult, RunStoreError,
};
use crate::sync::{
    InvocationOutcome, JobError, ProgressCallback, StartSyncOptions, StopReason, SyncController,
    SyncOptions, jobs,
};

/// Default page size for [`MirrorService::list_sync_jobs`].
pub const DEFAULT_LIST_LIMIT: u64 = 20;

/// Largest page size for [`MirrorService::list_sync_jobs`].
pub const MAX_LIST_LIMIT: u64 = 100;

/// Errors from service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Crm(#[from] CrmError),

    #[error(transparent)]
    Run(#[from] RunStoreError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<OverlapError> for ServiceError {
    fn from(err: OverlapError) -> Self {
        match err {
            OverlapError::Lookup(e) => Self::Crm(e),
            OverlapError::Run(e) => Self::Run(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Mirror size and the most recent job.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStats {
    pub total_mirrored_contacts: u64,
    pub latest_job: Option<SyncJob>,
}

/// Entry point for everything an operator (or scheduler) can ask for.
#[derive(Clone)]
pub struct MirrorService {
    db: Arc<DatabaseConnection>,
    controller: SyncController,
    overlap: OverlapChecker,
    defaults: SyncOptions,
}

impl MirrorService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ContactSource>,
        lookup: Arc<dyn ContactLookup>,
    ) -> Self {
        let sink: Arc<dyn MirrorSink> = Arc::new(DbMirrorSink::new(Arc::clone(&db)));
        Self {
            controller: SyncController::new(Arc::clone(&db), source, sink),
            overlap: OverlapChecker::new(lookup, OverlapOptions::default()),
            defaults: SyncOptions::default(),
            db,
        }
    }

    /// Service backed by one CRM client for both fetching and lookups.
    pub fn from_client(db: Arc<DatabaseConnection>, client: CrmClient) -> Self {
        let client = Arc::new(client);
        Self::new(db, client.clone(), client)
    }

    pub fn with_sync_defaults(mut self, defaults: SyncOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_overlap_options(mut self, options: OverlapOptions) -> Self {
        self.overlap = self.overlap.with_options(options);
        self
    }

    /// Stop sync invocations and overlap checks once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.controller = self.controller.with_cancellation(token.clone());
        self.overlap = self.overlap.with_cancellation(token);
        self
    }

    /// Defaults new jobs start from.
    pub fn sync_defaults(&self) -> &SyncOptions {
        &self.defaults
    }

    /// Create a queued sync job.
    pub async fn start_sync(
        &self,
        profile: Option<&str>,
        options: &StartSyncOptions,
    ) -> Result<SyncJob> {
        Ok(jobs::create(&self.db, profile, options).await?)
    }

    /// Run one bounded invocation of a job.
    pub async fn resume_sync(
        &self,
        job_id: Uuid,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<InvocationOutcome> {
        Ok(self.controller.resume_job(job_id, on_progress).await?)
    }

    /// Keep invoking the controller while it yields.
    pub async fn run_to_completion(
        &self,
        job_id: Uuid,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<InvocationOutcome> {
        let mut batches_run = 0;
        loop {
            let mut outcome = self.controller.resume_job(job_id, on_progress).await?;
            batches_run += outcome.batches_run;
            if outcome.stop != StopReason::Yielded {
                outcome.batches_run = batches_run;
                return Ok(outcome);
            }
        }
    }

    pub async fn get_sync_job(&self, job_id: Uuid) -> Result<SyncJob> {
        Ok(jobs::get(&self.db, job_id).await?)
    }

    /// Most recent jobs, newest first. `limit` is clamped to 1..=100.
    pub async fn list_sync_jobs(&self, limit: Option<u64>) -> Result<Vec<SyncJob>> {
        Ok(jobs::list_recent(&self.db, clamp_limit(limit)).await?)
    }

    pub async fn cancel_sync(&self, job_id: Uuid) -> Result<SyncJob> {
        Ok(jobs::cancel(&self.db, job_id).await?)
    }

    pub async fn get_mirror_stats(&self) -> Result<MirrorStats> {
        Ok(MirrorStats {
            total_mirrored_contacts: mirror::query::count(&self.db).await?,
            latest_job: jobs::latest(&self.db).await?,
        })
    }

    /// Running jobs whose heartbeat is older than the configured threshold.
    pub async fn find_stale_jobs(&self) -> Result<Vec<SyncJob>> {
        Ok(jobs::find_stale(&self.db, self.defaults.stale_after).await?)
    }

    /// Fail a running job whose heartbeat is stale.
    pub async fn mark_abandoned(&self, job_id: Uuid) -> Result<SyncJob> {
        Ok(jobs::mark_abandoned(&self.db, job_id, self.defaults.stale_after).await?)
    }

    pub async fn check_overlap(&self, contacts: &[CandidateContact]) -> Result<OverlapResult> {
        Ok(self.overlap.check_overlap(contacts).await?)
    }

    /// Overlap check over the candidates of a stored enrichment run.
    pub async fn check_run_overlap(
        &self,
        store: &dyn EnrichmentRunStore,
        run_id: &str,
    ) -> Result<OverlapResult> {
        Ok(self.overlap.check_run(store, run_id).await?)
    }
}

fn clamp_limit(limit: Option<u64>) -> u64 {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_clamped() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(1_000)), 100);
    }

    #[test]
    fn overlap_errors_map_to_service_errors() {
        let err: ServiceError = OverlapError::Run(RunStoreError::NotFound("r-1".into())).into();
        assert!(matches!(err, ServiceError::Run(RunStoreError::NotFound(_))));

        let err: ServiceError = OverlapError::Lookup(CrmError::Cancelled).into();
        assert!(matches!(err, ServiceError::Crm(CrmError::Cancelled)));
    }
}
