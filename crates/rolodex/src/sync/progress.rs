//! Progress events emitted while a sync job runs.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::client::{BackoffHook, BackoffNotice, BackoffReason};
use crate::entity::sync_status::SyncStatus;

/// Progress events emitted by the sync controller.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// An invocation took ownership of the job.
    JobClaimed {
        job_id: Uuid,
        /// Cursor the invocation starts from.
        next_start: i64,
    },

    /// A page came back from the CRM.
    BatchFetched {
        job_id: Uuid,
        start: i64,
        returned: usize,
        /// Total matching records reported by the CRM.
        total: Option<i64>,
    },

    /// A record could not be mirrored and was counted as rejected.
    RecordRejected { job_id: Uuid, reason: String },

    /// Batch progress was written to the job row.
    BatchPersisted {
        job_id: Uuid,
        batches_processed: i64,
        next_start: i64,
        total_synced: i64,
        total_rejected: i64,
        total_expected: Option<i64>,
    },

    /// The client is waiting before retrying a request.
    RateLimitBackoff {
        reason: BackoffReason,
        attempt: u32,
        delay: Duration,
    },

    /// The job reached a terminal state.
    JobFinished {
        job_id: Uuid,
        status: SyncStatus,
        total_synced: i64,
    },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

/// Forward client backoff notices as [`SyncProgress::RateLimitBackoff`].
pub fn backoff_hook(on_progress: Arc<ProgressCallback>) -> BackoffHook {
    Arc::new(move |notice: BackoffNotice| {
        on_progress(SyncProgress::RateLimitBackoff {
            reason: notice.reason,
            attempt: notice.attempt,
            delay: notice.delay,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_with_and_without_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let event = SyncProgress::JobClaimed {
            job_id: Uuid::new_v4(),
            next_start: 0,
        };
        emit(Some(&callback), event.clone());
        emit(None, event);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_notices_become_progress_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        let hook = backoff_hook(Arc::new(callback));
        hook(BackoffNotice {
            reason: BackoffReason::RateLimited,
            attempt: 2,
            delay: Duration::from_millis(40),
        });

        let seen = seen.lock().unwrap();
        assert!(matches!(
            seen.as_slice(),
            [SyncProgress::RateLimitBackoff { attempt: 2, .. }]
        ));
    }
}
