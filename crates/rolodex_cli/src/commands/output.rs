//! Table and JSON rendering shared by the commands.

use clap::ValueEnum;
use rolodex::{MirrorStats, OverlapResult, SyncJob};
use serde::Serialize;
use tabled::Tabled;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = tabled::Table::new(rows);
    table.with(tabled::settings::Style::rounded());
    println!("{}", table);
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// One sync job as a table row.
#[derive(Debug, Clone, Tabled)]
pub(crate) struct JobRow {
    #[tabled(rename = "Job")]
    pub(crate) id: String,
    #[tabled(rename = "Status")]
    pub(crate) status: String,
    #[tabled(rename = "Progress")]
    pub(crate) progress: String,
    #[tabled(rename = "Rejected")]
    pub(crate) rejected: i64,
    #[tabled(rename = "Batches")]
    pub(crate) batches: i64,
    #[tabled(rename = "Created")]
    pub(crate) created: String,
    #[tabled(rename = "Last Error")]
    pub(crate) last_error: String,
}

impl From<&SyncJob> for JobRow {
    fn from(job: &SyncJob) -> Self {
        let progress = match job.total_expected {
            Some(expected) => format!("{}/{}", job.total_synced, expected),
            None => job.total_synced.to_string(),
        };
        Self {
            id: job.id.to_string(),
            status: job.status.to_string(),
            progress,
            rejected: job.total_rejected,
            batches: job.batches_processed,
            created: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_error: job.last_error.clone().unwrap_or_default(),
        }
    }
}

pub(crate) fn print_jobs(jobs: &[SyncJob], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No sync jobs.");
                return;
            }
            print_table(jobs.iter().map(JobRow::from).collect());
        }
        OutputFormat::Json => print_json(jobs),
    }
}

pub(crate) fn print_job(job: &SyncJob, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(vec![JobRow::from(job)]),
        OutputFormat::Json => print_json(job),
    }
}

#[derive(Debug, Clone, Tabled)]
struct StatsRow {
    #[tabled(rename = "Mirrored Contacts")]
    total: u64,
    #[tabled(rename = "Latest Job")]
    latest_job: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Heartbeat")]
    heartbeat: String,
}

impl From<&MirrorStats> for StatsRow {
    fn from(stats: &MirrorStats) -> Self {
        let job = stats.latest_job.as_ref();
        Self {
            total: stats.total_mirrored_contacts,
            latest_job: job.map(|j| j.id.to_string()).unwrap_or_else(|| "-".into()),
            status: job
                .map(|j| j.status.to_string())
                .unwrap_or_else(|| "-".into()),
            heartbeat: job
                .and_then(|j| j.heartbeat_at)
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
        }
    }
}

pub(crate) fn print_stats(stats: &MirrorStats, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(vec![StatsRow::from(stats)]),
        OutputFormat::Json => print_json(stats),
    }
}

#[derive(Debug, Clone, Tabled)]
struct OverlapRow {
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "In CRM")]
    exists: &'static str,
}

pub(crate) fn print_overlap(result: &OverlapResult, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if !result.checked.is_empty() {
                print_table(
                    result
                        .checked
                        .iter()
                        .map(|(email, exists)| OverlapRow {
                            email: email.clone(),
                            exists: if *exists { "yes" } else { "no" },
                        })
                        .collect(),
                );
            }
            println!(
                "{} of {} candidates already in the CRM",
                result.existing_count, result.total_count
            );
            if result.lookup_failures > 0 {
                println!(
                    "{} lookups failed and were counted as not present",
                    result.lookup_failures
                );
            }
            if result.skipped > 0 {
                println!("{} emails skipped (lookup cap reached)", result.skipped);
            }
        }
        OutputFormat::Json => print_json(result),
    }
}
