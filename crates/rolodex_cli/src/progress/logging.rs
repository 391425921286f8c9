use rolodex::client::BackoffReason;
use rolodex::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::JobClaimed { job_id, next_start } => {
                tracing::info!(job_id = %job_id, next_start, "Sync invocation started");
            }

            SyncProgress::BatchFetched {
                job_id,
                start,
                returned,
                total,
            } => {
                tracing::debug!(job_id = %job_id, start, returned, total = ?total, "Fetched batch");
            }

            SyncProgress::RecordRejected { job_id, reason } => {
                tracing::warn!(job_id = %job_id, reason = %reason, "Record rejected");
            }

            SyncProgress::BatchPersisted {
                job_id,
                batches_processed,
                next_start,
                total_synced,
                total_rejected,
                total_expected,
            } => {
                tracing::info!(
                    job_id = %job_id,
                    batches_processed,
                    next_start,
                    total_synced,
                    total_rejected,
                    total_expected = ?total_expected,
                    "Batch saved"
                );
            }

            SyncProgress::RateLimitBackoff {
                reason,
                attempt,
                delay,
            } => match reason {
                BackoffReason::RateLimited => {
                    tracing::warn!(attempt, delay = ?delay, "Rate limited by CRM, backing off");
                }
                BackoffReason::Network => {
                    tracing::warn!(attempt, delay = ?delay, "Network error, retrying");
                }
            },

            SyncProgress::JobFinished {
                job_id,
                status,
                total_synced,
            } => {
                tracing::info!(job_id = %job_id, status = %status, total_synced, "Sync job finished");
            }

            _ => {}
        }
    }
}
