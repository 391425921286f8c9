//! Progress reporting for sync runs.
//!
//! This module provides two modes of progress reporting:
//! - Interactive mode (TTY): an indicatif bar per job
//! - Logging mode (non-TTY): structured logging using tracing

mod interactive;
mod logging;

use std::sync::Arc;

use console::Term;
use rolodex::sync::{ProgressCallback, SyncProgress};

pub use interactive::InteractiveReporter;
pub use logging::LoggingReporter;

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Interactive progress bars for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes, schedulers).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a new progress reporter, auto-detecting TTY mode.
    pub fn new() -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new())
        } else {
            Self::Logging(LoggingReporter)
        }
    }

    /// Handle a progress event.
    pub fn handle(&self, event: SyncProgress) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }

    /// Finish all progress bars (interactive mode only).
    pub fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex::SyncStatus;
    use uuid::Uuid;

    fn run_events(reporter: &ProgressReporter) {
        let job_id = Uuid::new_v4();
        reporter.handle(SyncProgress::JobClaimed {
            job_id,
            next_start: 0,
        });
        reporter.handle(SyncProgress::BatchFetched {
            job_id,
            start: 0,
            returned: 2,
            total: Some(3),
        });
        reporter.handle(SyncProgress::RecordRejected {
            job_id,
            reason: "record has neither an id nor an email".into(),
        });
        reporter.handle(SyncProgress::BatchPersisted {
            job_id,
            batches_processed: 1,
            next_start: 2,
            total_synced: 1,
            total_rejected: 1,
            total_expected: Some(3),
        });
        reporter.handle(SyncProgress::JobFinished {
            job_id,
            status: SyncStatus::Completed,
            total_synced: 1,
        });
        reporter.finish();
    }

    #[test]
    fn test_logging_reporter_handles_all_events() {
        run_events(&ProgressReporter::Logging(LoggingReporter));
    }

    #[test]
    fn test_interactive_reporter_handles_all_events() {
        run_events(&ProgressReporter::Interactive(InteractiveReporter::hidden()));
    }

    #[test]
    fn test_callback_forwards_events() {
        let reporter = Arc::new(ProgressReporter::Logging(LoggingReporter));
        let callback = reporter.as_callback();
        callback(SyncProgress::JobClaimed {
            job_id: Uuid::new_v4(),
            next_start: 400,
        });
    }
}
