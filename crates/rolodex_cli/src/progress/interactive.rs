use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rolodex::client::BackoffReason;
use rolodex::sync::SyncProgress;
use uuid::Uuid;

/// Interactive progress reporter using indicatif.
///
/// One bar per job: a spinner until the CRM reports a total, then a bar
/// whose position is the saved cursor.
pub struct InteractiveReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<Uuid, ProgressBar>>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Reporter that draws nowhere.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            SyncProgress::JobClaimed { job_id, next_start } => {
                let bar = bars.entry(job_id).or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new_spinner());
                    bar.set_style(spinner_style());
                    bar.set_prefix(short_id(job_id));
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                bar.set_position(next_start.max(0) as u64);
                bar.set_message(format!("resuming at {}", next_start));
            }

            SyncProgress::BatchFetched {
                job_id,
                start,
                returned,
                total,
            } => {
                if let Some(bar) = bars.get(&job_id) {
                    if let Some(total) = total.filter(|t| *t > 0)
                        && bar.length().is_none()
                    {
                        bar.set_length(total as u64);
                        bar.set_style(bar_style());
                    }
                    bar.set_message(format!("fetched {} at {}", returned, start));
                }
            }

            SyncProgress::RecordRejected { job_id, reason } => {
                if let Some(bar) = bars.get(&job_id) {
                    bar.println(format!("  rejected: {}", reason));
                }
            }

            SyncProgress::BatchPersisted {
                job_id,
                next_start,
                total_synced,
                total_rejected,
                total_expected,
                ..
            } => {
                if let Some(bar) = bars.get(&job_id) {
                    if let Some(expected) = total_expected {
                        bar.set_length(expected.max(next_start) as u64);
                    }
                    bar.set_position(next_start.max(0) as u64);
                    bar.set_message(format!(
                        "{} synced, {} rejected",
                        total_synced, total_rejected
                    ));
                }
            }

            SyncProgress::RateLimitBackoff {
                reason,
                attempt,
                delay,
            } => {
                let why = match reason {
                    BackoffReason::RateLimited => "rate limited",
                    BackoffReason::Network => "network error",
                };
                for bar in bars.values() {
                    bar.set_message(format!(
                        "{}, retry {} in {:.1}s",
                        why,
                        attempt,
                        delay.as_secs_f64()
                    ));
                }
            }

            SyncProgress::JobFinished {
                job_id,
                status,
                total_synced,
            } => {
                if let Some(bar) = bars.remove(&job_id) {
                    bar.disable_steady_tick();
                    bar.finish_with_message(format!(
                        "{}: {} contacts mirrored",
                        status, total_synced
                    ));
                }
            }

            _ => {}
        }
    }

    /// Stop every bar still drawing (e.g. the invocation yielded).
    pub fn finish(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, bar) in bars.drain() {
            bar.disable_steady_tick();
            bar.abandon();
        }
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold.cyan} {spinner:.green} {pos:>6} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>6}/{len:6} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━─")
}
