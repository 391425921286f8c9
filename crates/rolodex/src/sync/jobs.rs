//! Persistence for sync jobs.
//!
//! Every write goes through [`save`], a compare-and-set on the row's
//! `revision`: the update only applies when the stored revision still
//! matches the one the caller read, so concurrent invocations for the same
//! job serialize on the database rather than in process memory.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::sync_job::{Column, Entity as SyncJobEntity, Model as SyncJob};
use crate::entity::sync_status::SyncStatus;

use super::types::StartSyncOptions;

/// `last_error` written by [`mark_abandoned`].
pub const ABANDONED_ERROR: &str = "abandoned: heartbeat stale";

/// Attempts [`cancel`] makes when it keeps losing the compare-and-set.
const CANCEL_ATTEMPTS: usize = 3;

/// Errors that can occur during sync job operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Job not found.
    #[error("Sync job not found: {context}")]
    NotFound { context: String },

    /// Another writer updated the job since it was read.
    #[error("Sync job {id} was modified concurrently")]
    Conflict { id: Uuid },

    /// The requested status change is not allowed.
    #[error("Sync job cannot move from {from} to {to}")]
    InvalidTransition { from: SyncStatus, to: SyncStatus },

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl JobError {
    pub fn not_found_by_id(id: Uuid) -> Self {
        Self::NotFound {
            context: format!("id={id}"),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Result type alias for job operations.
pub type Result<T> = std::result::Result<T, JobError>;

fn now() -> DateTime<chrono::FixedOffset> {
    Utc::now().fixed_offset()
}

/// Create a queued job, inheriting progress from `options.resume_from`.
pub async fn create(
    db: &DatabaseConnection,
    requested_by: Option<&str>,
    options: &StartSyncOptions,
) -> Result<SyncJob> {
    let validated = options.validate()?;
    let created = now();

    let mut job = SyncJob {
        id: Uuid::new_v4(),
        created_at: created,
        updated_at: created,
        requested_by: requested_by.map(str::to_string),
        status: SyncStatus::Queued,
        batch_size: validated.batch_size,
        include_deleted: options.include_deleted,
        max_batches_per_invocation: validated.max_batches,
        max_contacts: validated.max_contacts,
        next_start: 0,
        total_expected: None,
        total_synced: 0,
        total_rejected: 0,
        batches_processed: 0,
        last_batch_size: 0,
        started_at: None,
        finished_at: None,
        heartbeat_at: None,
        last_error: None,
        metadata: json!({}),
        revision: 0,
    };

    if let Some(previous_id) = options.resume_from {
        let previous = get(db, previous_id).await?;
        if !matches!(previous.status, SyncStatus::Failed | SyncStatus::Cancelled) {
            return Err(JobError::invalid_input(format!(
                "can only resume from a failed or cancelled job; {previous_id} is {}",
                previous.status
            )));
        }
        if previous.include_deleted != options.include_deleted {
            return Err(JobError::invalid_input(
                "include_deleted must match the job being resumed",
            ));
        }
        job.next_start = previous.next_start;
        job.total_expected = previous.total_expected;
        job.total_synced = previous.total_synced;
        job.total_rejected = previous.total_rejected;
        job.batches_processed = previous.batches_processed;
        job.metadata = json!({ "resumed_from": previous_id.to_string() });
    }

    let job = job.into_active_model().reset_all().insert(db).await?;
    tracing::info!(
        job_id = %job.id,
        next_start = job.next_start,
        resumed_from = ?job.resumed_from(),
        "created sync job"
    );
    Ok(job)
}

/// Load a job by id.
pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<SyncJob> {
    SyncJobEntity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| JobError::not_found_by_id(id))
}

/// Most recently created jobs, newest first.
pub async fn list_recent(db: &DatabaseConnection, limit: u64) -> Result<Vec<SyncJob>> {
    Ok(SyncJobEntity::find()
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

/// The most recently created job, if any.
pub async fn latest(db: &DatabaseConnection) -> Result<Option<SyncJob>> {
    Ok(SyncJobEntity::find()
        .order_by_desc(Column::CreatedAt)
        .one(db)
        .await?)
}

/// Write `next` over `current` if nobody else has written since `current`
/// was read.
///
/// Bumps `revision` and `updated_at`. Fails with [`JobError::Conflict`] when
/// the stored revision moved on, and [`JobError::InvalidTransition`] when the
/// status change is not a forward move.
pub async fn save(db: &DatabaseConnection, current: &SyncJob, next: SyncJob) -> Result<SyncJob> {
    let status_ok = current.status.can_transition_to(next.status)
        || (current.status == SyncStatus::Queued && next.status == SyncStatus::Queued);
    if !status_ok {
        return Err(JobError::InvalidTransition {
            from: current.status,
            to: next.status,
        });
    }
    if next.id != current.id || next.next_start < current.next_start {
        return Err(JobError::invalid_input("job id and cursor cannot move backwards"));
    }

    let mut next = next;
    next.revision = current.revision + 1;
    next.updated_at = now();

    let result = SyncJobEntity::update_many()
        .set(next.clone().into_active_model().reset_all())
        .filter(Column::Id.eq(current.id))
        .filter(Column::Revision.eq(current.revision))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        tracing::debug!(job_id = %current.id, revision = current.revision, "sync job write lost the race");
        return Err(JobError::Conflict { id: current.id });
    }
    Ok(next)
}

/// Move a job to `running` (or refresh the heartbeat of a running one).
pub async fn claim(db: &DatabaseConnection, job: &SyncJob) -> Result<SyncJob> {
    let at = now();
    let mut next = job.clone();
    next.status = SyncStatus::Running;
    next.started_at = job.started_at.or(Some(at));
    next.heartbeat_at = Some(at);
    save(db, job, next).await
}

/// Fail a job, keeping its cursor and counters.
pub async fn fail(db: &DatabaseConnection, job: &SyncJob, message: &str) -> Result<SyncJob> {
    let at = now();
    let mut next = job.clone();
    next.status = SyncStatus::Failed;
    next.finished_at = Some(at);
    next.heartbeat_at = Some(at);
    next.last_error = Some(message.to_string());
    bump_failure_marks(&mut next.metadata);
    save(db, job, next).await
}

fn bump_failure_marks(metadata: &mut serde_json::Value) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    let marks = metadata
        .get("failure_marks")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    metadata["failure_marks"] = json!(marks + 1);
}

/// Cancel a queued or running job. Finished jobs are returned unchanged.
pub async fn cancel(db: &DatabaseConnection, id: Uuid) -> Result<SyncJob> {
    let mut last_conflict = None;
    for _ in 0..CANCEL_ATTEMPTS {
        let job = get(db, id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        let mut next = job.clone();
        next.status = SyncStatus::Cancelled;
        next.finished_at = Some(now());
        match save(db, &job, next).await {
            Ok(job) => {
                tracing::info!(job_id = %id, next_start = job.next_start, "cancelled sync job");
                return Ok(job);
            }
            Err(e @ JobError::Conflict { .. }) => last_conflict = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_conflict.unwrap_or(JobError::Conflict { id }))
}

/// Running jobs whose heartbeat is older than `threshold`.
pub async fn find_stale(
    db: &DatabaseConnection,
    threshold: std::time::Duration,
) -> Result<Vec<SyncJob>> {
    let cutoff = stale_cutoff(threshold)?;
    Ok(SyncJobEntity::find()
        .filter(Column::Status.eq(SyncStatus::Running))
        .filter(Column::HeartbeatAt.lt(cutoff))
        .order_by_asc(Column::HeartbeatAt)
        .all(db)
        .await?)
}

/// Fail a running job whose heartbeat is older than `threshold`.
pub async fn mark_abandoned(
    db: &DatabaseConnection,
    id: Uuid,
    threshold: std::time::Duration,
) -> Result<SyncJob> {
    let job = get(db, id).await?;
    if job.status != SyncStatus::Running {
        return Err(JobError::InvalidTransition {
            from: job.status,
            to: SyncStatus::Failed,
        });
    }
    let cutoff = stale_cutoff(threshold)?;
    if job.heartbeat_at.is_some_and(|beat| beat >= cutoff) {
        return Err(JobError::invalid_input(format!(
            "job {id} has a fresh heartbeat"
        )));
    }

    let job = fail(db, &job, ABANDONED_ERROR).await?;
    tracing::warn!(job_id = %id, next_start = job.next_start, "marked sync job abandoned");
    Ok(job)
}

fn stale_cutoff(threshold: std::time::Duration) -> Result<DateTime<chrono::FixedOffset>> {
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .map(|cutoff| cutoff.fixed_offset())
        .ok_or_else(|| JobError::invalid_input("stale threshold out of range"))
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use super::*;
    use crate::testing::memory_db;
    use std::time::Duration;

    #[tokio::test]
    async fn create_applies_options() {
        let db = memory_db().await;
        let options = StartSyncOptions {
            batch_size: 50,
            max_contacts: Some(120),
            ..Default::default()
        };
        let job = create(&db, Some("ops"), &options).await.unwrap();

        assert_eq!(job.status, SyncStatus::Queued);
        assert_eq!(job.batch_size, 50);
        assert_eq!(job.max_contacts, Some(120));
        assert_eq!(job.requested_by.as_deref(), Some("ops"));
        assert_eq!(get(&db, job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn create_rejects_invalid_options() {
        let db = memory_db().await;
        let options = StartSyncOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            create(&db, None, &options).await,
            Err(JobError::InvalidInput { .. })
        ));
        assert!(list_recent(&db, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_from_inherits_cursor_of_failed_job() {
        let db = memory_db().await;
        let first = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let running = claim(&db, &first).await.unwrap();
        let mut progressed = running.clone();
        progressed.next_start = 200;
        progressed.total_synced = 198;
        progressed.total_rejected = 2;
        progressed.batches_processed = 1;
        let progressed = save(&db, &running, progressed).await.unwrap();
        fail(&db, &progressed, "rate limited").await.unwrap();

        let options = StartSyncOptions {
            resume_from: Some(first.id),
            ..Default::default()
        };
        let second = create(&db, None, &options).await.unwrap();
        assert_eq!(second.next_start, 200);
        assert_eq!(second.total_synced, 198);
        assert_eq!(second.total_rejected, 2);
        assert_eq!(second.resumed_from(), Some(first.id));
    }

    #[tokio::test]
    async fn resume_from_requires_failed_or_cancelled_source() {
        let db = memory_db().await;
        let queued = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let options = StartSyncOptions {
            resume_from: Some(queued.id),
            ..Default::default()
        };
        assert!(matches!(
            create(&db, None, &options).await,
            Err(JobError::InvalidInput { .. })
        ));

        let options = StartSyncOptions {
            resume_from: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(matches!(
            create(&db, None, &options).await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let db = memory_db().await;
        let job = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let claimed = claim(&db, &job).await.unwrap();
        assert_eq!(claimed.revision, job.revision + 1);

        // Writing from the pre-claim snapshot must not apply.
        let err = claim(&db, &job).await.expect_err("stale");
        assert!(matches!(err, JobError::Conflict { .. }));
        assert_eq!(get(&db, job.id).await.unwrap().revision, claimed.revision);
    }

    #[tokio::test]
    async fn finished_jobs_cannot_restart() {
        let db = memory_db().await;
        let job = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let running = claim(&db, &job).await.unwrap();
        let mut done = running.clone();
        done.status = SyncStatus::Completed;
        let done = save(&db, &running, done).await.unwrap();

        assert!(matches!(
            claim(&db, &done).await,
            Err(JobError::InvalidTransition {
                from: SyncStatus::Completed,
                to: SyncStatus::Running
            })
        ));
    }

    #[tokio::test]
    async fn cursor_cannot_move_backwards() {
        let db = memory_db().await;
        let job = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let running = claim(&db, &job).await.unwrap();
        let mut advanced = running.clone();
        advanced.next_start = 400;
        let advanced = save(&db, &running, advanced).await.unwrap();

        let mut rewound = advanced.clone();
        rewound.next_start = 200;
        assert!(matches!(
            save(&db, &advanced, rewound).await,
            Err(JobError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_finished_jobs() {
        let db = memory_db().await;
        let job = create(&db, None, &StartSyncOptions::default()).await.unwrap();

        let cancelled = cancel(&db, job.id).await.unwrap();
        assert_eq!(cancelled.status, SyncStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let again = cancel(&db, job.id).await.unwrap();
        assert_eq!(again.revision, cancelled.revision);

        assert!(matches!(
            cancel(&db, Uuid::new_v4()).await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_running_jobs_can_be_marked_abandoned() {
        let db = memory_db().await;
        let job = create(&db, None, &StartSyncOptions::default()).await.unwrap();
        let running = claim(&db, &job).await.unwrap();

        let threshold = Duration::from_secs(60);
        assert!(find_stale(&db, threshold).await.unwrap().is_empty());
        assert!(matches!(
            mark_abandoned(&db, job.id, threshold).await,
            Err(JobError::InvalidInput { .. })
        ));

        let mut old = running.clone();
        old.heartbeat_at = Some((Utc::now() - chrono::Duration::minutes(10)).fixed_offset());
        save(&db, &running, old).await.unwrap();

        let stale = find_stale(&db, threshold).await.unwrap();
        assert_eq!(stale.len(), 1);

        let failed = mark_abandoned(&db, job.id, threshold).await.unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some(ABANDONED_ERROR));
        assert_eq!(failed.metadata["failure_marks"], 1);
        assert!(find_stale(&db, threshold).await.unwrap().is_empty());
    }
}
