//! The batch loop that drives a sync job.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::ContactSource;
use crate::entity::sync_job::Model as SyncJob;
use crate::entity::sync_status::SyncStatus;
use crate::error::CrmError;
use crate::mirror::MirrorSink;

use super::jobs::{self, JobError, Result};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{InvocationOutcome, StopReason};

/// Runs bounded invocations of sync jobs.
///
/// The controller holds no job state between calls: each invocation reads
/// the job row, claims it, and writes progress back after every batch, so
/// any process can resume any job.
#[derive(Clone)]
pub struct SyncController {
    db: Arc<DatabaseConnection>,
    source: Arc<dyn ContactSource>,
    sink: Arc<dyn MirrorSink>,
    cancel: CancellationToken,
}

/// Per-batch tallies.
#[derive(Default)]
struct BatchCounts {
    upserted: i64,
    rejected: i64,
}

impl SyncController {
    pub fn new(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ContactSource>,
        sink: Arc<dyn MirrorSink>,
    ) -> Self {
        Self {
            db,
            source,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between batches once `token` fires. The job is left running so
    /// a later invocation can pick it up.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run up to `max_batches_per_invocation` batches of job `job_id`.
    ///
    /// Safe to call repeatedly and concurrently: a losing writer stops with
    /// [`StopReason::Interrupted`] without touching the row.
    pub async fn resume_job(
        &self,
        job_id: Uuid,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<InvocationOutcome> {
        let job = jobs::get(&self.db, job_id).await?;
        if job.status.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "sync job already finished");
            return Ok(outcome(job, 0, StopReason::AlreadyFinished));
        }
        if self.cancel.is_cancelled() {
            return Ok(outcome(job, 0, StopReason::Interrupted));
        }

        let mut job = match jobs::claim(&self.db, &job).await {
            Ok(job) => job,
            Err(JobError::Conflict { .. }) => return self.lost_race(job_id, 0).await,
            Err(e) => return Err(e),
        };
        tracing::info!(job_id = %job_id, next_start = job.next_start, "claimed sync job");
        emit(
            on_progress,
            SyncProgress::JobClaimed {
                job_id,
                next_start: job.next_start,
            },
        );

        let max_batches = u32::try_from(job.max_batches_per_invocation.max(1)).unwrap_or(1);
        let mut batches_run = 0u32;

        loop {
            if batches_run >= max_batches {
                tracing::info!(
                    job_id = %job_id,
                    batches_run,
                    next_start = job.next_start,
                    "yielding sync job"
                );
                return Ok(outcome(job, batches_run, StopReason::Yielded));
            }

            // Cooperative cancellation: observe writes made since our last save.
            let stored = jobs::get(&self.db, job_id).await?;
            if stored.revision != job.revision {
                return Ok(self.finish_interrupted(stored, batches_run, on_progress));
            }
            if self.cancel.is_cancelled() {
                return Ok(outcome(job, batches_run, StopReason::Interrupted));
            }

            let count = match job.remaining_allowance() {
                Some(0) => {
                    let next = completed(&job);
                    return self.persist_final(job, next, batches_run, on_progress).await;
                }
                Some(remaining) => remaining.min(i64::from(job.batch_size)),
                None => i64::from(job.batch_size),
            };

            let batch = job.batches_processed + 1;
            tracing::debug!(job_id = %job_id, batch, start = job.next_start, count, "fetching batch");
            let mut page = match self
                .source
                .fetch_page(job.next_start, count, job.include_deleted)
                .await
            {
                Ok(page) => page,
                Err(CrmError::Cancelled) => {
                    return Ok(outcome(job, batches_run, StopReason::Interrupted));
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, batch, error = %e, "batch fetch failed");
                    return self.fail(job, batches_run, &e.to_string(), on_progress).await;
                }
            };
            page.data.truncate(usize::try_from(count).unwrap_or(usize::MAX));
            let returned = page.data.len();
            emit(
                on_progress,
                SyncProgress::BatchFetched {
                    job_id,
                    start: job.next_start,
                    returned,
                    total: page.total,
                },
            );

            let mut counts = BatchCounts::default();
            for record in &page.data {
                match self.sink.upsert(record).await {
                    Ok(_) => counts.upserted += 1,
                    Err(e) if e.is_record_level() => {
                        counts.rejected += 1;
                        tracing::warn!(job_id = %job_id, batch, error = %e, "rejected record");
                        emit(
                            on_progress,
                            SyncProgress::RecordRejected {
                                job_id,
                                reason: e.to_string(),
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, batch, error = %e, "mirror write failed");
                        return self.fail(job, batches_run, &e.to_string(), on_progress).await;
                    }
                }
            }

            let returned = returned as i64;
            let mut next = job.clone();
            next.next_start += returned;
            next.total_synced += counts.upserted;
            next.total_rejected += counts.rejected;
            next.batches_processed += 1;
            next.last_batch_size = i32::try_from(returned).unwrap_or(i32::MAX);
            next.heartbeat_at = Some(Utc::now().fixed_offset());
            if next.total_expected.is_none() {
                next.total_expected = page
                    .total
                    .map(|total| next.max_contacts.map_or(total, |cap| total.min(cap)));
            }
            next.total_expected = next.total_expected.map(|t| t.max(next.total_synced));

            let exhausted = returned < count || next.remaining_allowance() == Some(0);
            let next = if exhausted { completed(&next) } else { next };

            job = match jobs::save(&self.db, &job, next).await {
                Ok(saved) => saved,
                Err(JobError::Conflict { .. }) => return self.lost_race(job_id, batches_run).await,
                Err(e) => return Err(e),
            };
            batches_run += 1;

            tracing::debug!(
                job_id = %job_id,
                batch,
                returned,
                upserted = counts.upserted,
                rejected = counts.rejected,
                next_start = job.next_start,
                "persisted batch"
            );
            emit(
                on_progress,
                SyncProgress::BatchPersisted {
                    job_id,
                    batches_processed: job.batches_processed,
                    next_start: job.next_start,
                    total_synced: job.total_synced,
                    total_rejected: job.total_rejected,
                    total_expected: job.total_expected,
                },
            );

            if exhausted {
                return Ok(self.finished(job, batches_run, StopReason::Completed, on_progress));
            }
        }
    }

    async fn persist_final(
        &self,
        current: SyncJob,
        next: SyncJob,
        batches_run: u32,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<InvocationOutcome> {
        match jobs::save(&self.db, &current, next).await {
            Ok(job) => Ok(self.finished(job, batches_run, StopReason::Completed, on_progress)),
            Err(JobError::Conflict { .. }) => self.lost_race(current.id, batches_run).await,
            Err(e) => Err(e),
        }
    }

    async fn fail(
        &self,
        job: SyncJob,
        batches_run: u32,
        message: &str,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<InvocationOutcome> {
        match jobs::fail(&self.db, &job, message).await {
            Ok(job) => Ok(self.finished(job, batches_run, StopReason::Failed, on_progress)),
            Err(JobError::Conflict { .. }) => self.lost_race(job.id, batches_run).await,
            Err(e) => Err(e),
        }
    }

    /// Another writer won the compare-and-set; report what it did.
    async fn lost_race(&self, job_id: Uuid, batches_run: u32) -> Result<InvocationOutcome> {
        let stored = jobs::get(&self.db, job_id).await?;
        Ok(self.finish_interrupted(stored, batches_run, None))
    }

    fn finish_interrupted(
        &self,
        stored: SyncJob,
        batches_run: u32,
        on_progress: Option<&ProgressCallback>,
    ) -> InvocationOutcome {
        if stored.status == SyncStatus::Cancelled {
            self.finished(stored, batches_run, StopReason::Cancelled, on_progress)
        } else {
            tracing::info!(job_id = %stored.id, status = %stored.status, "sync job changed underneath this invocation");
            outcome(stored, batches_run, StopReason::Interrupted)
        }
    }

    fn finished(
        &self,
        job: SyncJob,
        batches_run: u32,
        stop: StopReason,
        on_progress: Option<&ProgressCallback>,
    ) -> InvocationOutcome {
        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            total_synced = job.total_synced,
            total_rejected = job.total_rejected,
            "sync job finished"
        );
        emit(
            on_progress,
            SyncProgress::JobFinished {
                job_id: job.id,
                status: job.status,
                total_synced: job.total_synced,
            },
        );
        outcome(job, batches_run, stop)
    }
}

fn completed(job: &SyncJob) -> SyncJob {
    let mut next = job.clone();
    next.status = SyncStatus::Completed;
    next.finished_at = Some(Utc::now().fixed_offset());
    next
}

fn outcome(job: SyncJob, batches_run: u32, stop: StopReason) -> InvocationOutcome {
    InvocationOutcome {
        job,
        batches_run,
        stop,
    }
}
