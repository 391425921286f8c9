use std::sync::Arc;

use rolodex::sync::backoff_hook;
use rolodex::{InvocationOutcome, MirrorService, StartSyncOptions, StopReason, SyncOptions};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::SyncAction;
use crate::commands::output::{print_job, print_jobs};
use crate::commands::shared::build_service;
use crate::config::Config;
use crate::progress::ProgressReporter;

pub(crate) async fn handle_sync(
    action: SyncAction,
    config: &Config,
    db: Arc<DatabaseConnection>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SyncAction::Start {
            batch_size,
            max_batches,
            include_deleted,
            max_contacts,
            resume_from,
            requested_by,
            detach,
            once,
        } => {
            let service = build_service(config, db.clone(), cancel.clone(), None)?;
            let options = start_options(
                service.sync_defaults(),
                batch_size,
                max_batches,
                include_deleted,
                max_contacts,
                resume_from,
            );
            let job = service
                .start_sync(requested_by.as_deref(), &options)
                .await?;
            match resume_from {
                Some(from) => println!(
                    "Created sync job {} continuing {} at contact {}",
                    job.id, from, job.next_start
                ),
                None => println!("Created sync job {}", job.id),
            }

            if detach {
                println!("Run it with: rolodex sync resume {}", job.id);
                return Ok(());
            }
            run_job(config, db, cancel, job.id, once).await
        }

        SyncAction::Resume { job_id, once } => run_job(config, db, cancel, job_id, once).await,

        SyncAction::Status { job_id, output } => {
            let service = build_service(config, db, cancel, None)?;
            let job = service.get_sync_job(job_id).await?;
            print_job(&job, output);
            Ok(())
        }

        SyncAction::List { limit, output } => {
            let service = build_service(config, db, cancel, None)?;
            let jobs = service.list_sync_jobs(limit).await?;
            print_jobs(&jobs, output);
            Ok(())
        }

        SyncAction::Cancel { job_id } => {
            let service = build_service(config, db, cancel, None)?;
            let job = service.cancel_sync(job_id).await?;
            println!(
                "Job {} is {} at contact {}",
                job.id, job.status, job.next_start
            );
            Ok(())
        }

        SyncAction::Stale { mark, output } => {
            let service = build_service(config, db, cancel, None)?;
            let stale = service.find_stale_jobs().await?;
            if !mark {
                print_jobs(&stale, output);
                return Ok(());
            }

            let mut marked = Vec::with_capacity(stale.len());
            for job in stale {
                match service.mark_abandoned(job.id).await {
                    Ok(job) => marked.push(job),
                    // Another invocation may have picked it up since the scan.
                    Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Could not mark job abandoned"),
                }
            }
            print_jobs(&marked, output);
            Ok(())
        }
    }
}

/// Apply CLI overrides on top of the configured defaults.
fn start_options(
    defaults: &SyncOptions,
    batch_size: Option<u32>,
    max_batches: Option<u32>,
    include_deleted: Option<bool>,
    max_contacts: Option<u64>,
    resume_from: Option<Uuid>,
) -> StartSyncOptions {
    let mut options = StartSyncOptions::from(defaults);
    if let Some(size) = batch_size {
        options.batch_size = size;
    }
    if let Some(max) = max_batches {
        options.max_batches_per_invocation = max;
    }
    if let Some(include) = include_deleted {
        options.include_deleted = include;
    }
    options.max_contacts = max_contacts;
    options.resume_from = resume_from;
    options
}

async fn run_job(
    config: &Config,
    db: Arc<DatabaseConnection>,
    cancel: CancellationToken,
    job_id: Uuid,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();
    let service: MirrorService = build_service(
        config,
        db,
        cancel,
        Some(backoff_hook(Arc::clone(&callback))),
    )?;

    let outcome = if once {
        service.resume_sync(job_id, Some(callback.as_ref())).await
    } else {
        service.run_to_completion(job_id, Some(callback.as_ref())).await
    };
    reporter.finish();

    report_outcome(&outcome?)
}

fn report_outcome(outcome: &InvocationOutcome) -> Result<(), Box<dyn std::error::Error>> {
    let job = &outcome.job;
    match outcome.stop {
        StopReason::Completed => {
            println!(
                "Job {} completed: {} contacts mirrored, {} rejected ({} batches this run)",
                job.id, job.total_synced, job.total_rejected, outcome.batches_run
            );
        }
        StopReason::Yielded => {
            println!(
                "Job {} paused after {} batches at contact {}; run `rolodex sync resume {}` to continue",
                job.id, outcome.batches_run, job.next_start, job.id
            );
        }
        StopReason::Interrupted => {
            println!(
                "Job {} interrupted at contact {}; run `rolodex sync resume {}` to continue",
                job.id, job.next_start, job.id
            );
        }
        StopReason::Cancelled => {
            println!("Job {} was cancelled at contact {}", job.id, job.next_start);
        }
        StopReason::AlreadyFinished => {
            println!("Job {} had already finished ({})", job.id, job.status);
        }
        StopReason::Failed => {
            return Err(format!(
                "Sync job {} failed at contact {}: {}. Start a new job with --resume-from {} to continue.",
                job.id,
                job.next_start,
                job.last_error.as_deref().unwrap_or("unknown error"),
                job.id
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_options_use_configured_defaults() {
        let defaults = SyncOptions {
            batch_size: 150,
            include_deleted: true,
            ..SyncOptions::default()
        };
        let options = start_options(&defaults, None, None, None, None, None);
        assert_eq!(options.batch_size, 150);
        assert!(options.include_deleted);
        assert_eq!(
            options.max_batches_per_invocation,
            defaults.max_batches_per_invocation
        );
    }

    #[test]
    fn test_start_options_apply_overrides() {
        let resume = Uuid::new_v4();
        let options = start_options(
            &SyncOptions::default(),
            Some(50),
            Some(2),
            Some(true),
            Some(1_000),
            Some(resume),
        );
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.max_batches_per_invocation, 2);
        assert!(options.include_deleted);
        assert_eq!(options.max_contacts, Some(1_000));
        assert_eq!(options.resume_from, Some(resume));
    }

    #[test]
    fn test_start_options_can_turn_off_configured_include_deleted() {
        let defaults = SyncOptions {
            include_deleted: true,
            ..SyncOptions::default()
        };
        let options = start_options(&defaults, None, None, Some(false), None, None);
        assert!(!options.include_deleted);
    }
}
