//! Sync job options, limits, and invocation results.

use std::time::Duration;

use uuid::Uuid;

use crate::entity::sync_job::Model as SyncJob;

use super::jobs::JobError;

/// Default number of contacts fetched per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 200;

/// Largest batch the CRM query endpoint accepts.
pub const MAX_BATCH_SIZE: u32 = 500;

/// Default number of batches one invocation runs before yielding.
pub const DEFAULT_MAX_BATCHES_PER_INVOCATION: u32 = 10;

/// Heartbeat age after which a running job counts as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Defaults applied to new jobs, usually loaded from configuration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: u32,
    pub max_batches_per_invocation: u32,
    pub include_deleted: bool,
    /// Liveness threshold for [`find_stale_jobs`](super::find_stale_jobs).
    pub stale_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches_per_invocation: DEFAULT_MAX_BATCHES_PER_INVOCATION,
            include_deleted: false,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Parameters of a `start_sync` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSyncOptions {
    pub batch_size: u32,
    pub include_deleted: bool,
    pub max_batches_per_invocation: u32,
    /// Stop after this many contacts have been fetched.
    pub max_contacts: Option<u64>,
    /// Inherit the cursor and counters of a failed or cancelled job.
    pub resume_from: Option<Uuid>,
}

impl Default for StartSyncOptions {
    fn default() -> Self {
        Self::from(&SyncOptions::default())
    }
}

impl From<&SyncOptions> for StartSyncOptions {
    fn from(options: &SyncOptions) -> Self {
        Self {
            batch_size: options.batch_size,
            include_deleted: options.include_deleted,
            max_batches_per_invocation: options.max_batches_per_invocation,
            max_contacts: None,
            resume_from: None,
        }
    }
}

impl StartSyncOptions {
    /// Check the limits, returning the values in their stored widths.
    pub(crate) fn validate(&self) -> Result<ValidatedOptions, JobError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(JobError::invalid_input(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        let max_batches = i32::try_from(self.max_batches_per_invocation)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                JobError::invalid_input(format!(
                    "max_batches_per_invocation must be at least 1, got {}",
                    self.max_batches_per_invocation
                ))
            })?;
        let max_contacts = match self.max_contacts {
            None => None,
            Some(n) => Some(i64::try_from(n).ok().filter(|n| *n >= 1).ok_or_else(|| {
                JobError::invalid_input(format!("max_contacts must be at least 1, got {n}"))
            })?),
        };

        Ok(ValidatedOptions {
            batch_size: self.batch_size as i32,
            max_batches,
            max_contacts,
        })
    }
}

pub(crate) struct ValidatedOptions {
    pub batch_size: i32,
    pub max_batches: i32,
    pub max_contacts: Option<i64>,
}

/// Why an invocation returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source was exhausted (or `max_contacts` reached).
    Completed,
    /// The per-invocation batch limit was reached; call again to continue.
    Yielded,
    /// The job was cancelled before or during this invocation.
    Cancelled,
    /// A job-level error failed the job.
    Failed,
    /// The job had already finished when the invocation started.
    AlreadyFinished,
    /// Another writer updated the job, or the process is shutting down.
    Interrupted,
}

impl StopReason {
    /// Whether invoking the controller again could make progress.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Yielded | Self::Interrupted)
    }
}

/// Result of one controller invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// The job as last read or written.
    pub job: SyncJob,
    pub batches_run: u32,
    pub stop: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_sync_options() {
        let options = StartSyncOptions::default();
        assert_eq!(options.batch_size, 200);
        assert_eq!(options.max_batches_per_invocation, 10);
        assert!(!options.include_deleted);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn batch_size_bounds() {
        for bad in [0, 501] {
            let options = StartSyncOptions {
                batch_size: bad,
                ..Default::default()
            };
            assert!(matches!(
                options.validate(),
                Err(JobError::InvalidInput { .. })
            ));
        }
        for good in [1, 500] {
            let options = StartSyncOptions {
                batch_size: good,
                ..Default::default()
            };
            assert_eq!(options.validate().unwrap().batch_size, good as i32);
        }
    }

    #[test]
    fn max_batches_and_contacts_must_be_positive() {
        let options = StartSyncOptions {
            max_batches_per_invocation: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = StartSyncOptions {
            max_contacts: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = StartSyncOptions {
            max_contacts: Some(250),
            ..Default::default()
        };
        assert_eq!(options.validate().unwrap().max_contacts, Some(250));
    }

    #[test]
    fn resumable_stops() {
        assert!(StopReason::Yielded.is_resumable());
        assert!(StopReason::Interrupted.is_resumable());
        assert!(!StopReason::Completed.is_resumable());
        assert!(!StopReason::Failed.is_resumable());
    }
}
