//! Existence check of candidate contacts against the CRM.
//!
//! Candidates are de-duplicated by normalized email, then looked up in
//! fixed-size concurrent chunks with a pause between chunks. Lookups that
//! fail after the client's own retries count as "not present"; only
//! authentication failures and cancellation abort the check.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::ContactLookup;
use crate::error::CrmError;
use crate::mirror::normalize_email;

/// Default number of lookups in flight at once.
pub const DEFAULT_OVERLAP_CONCURRENCY: usize = 5;

/// Default pause between lookup chunks.
pub const DEFAULT_OVERLAP_BATCH_DELAY: Duration = Duration::from_millis(250);

/// A contact proposed for export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateContact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
}

impl CandidateContact {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }
}

/// Outcome of an overlap check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverlapResult {
    /// Emails already present in the CRM, in input order and as spelled
    /// by the caller.
    pub existing_emails: Vec<String>,
    pub existing_count: usize,
    /// Number of candidates given, including ones without an email.
    pub total_count: usize,
    /// Existence per distinct email, keyed by its first spelling in the input.
    pub checked: BTreeMap<String, bool>,
    /// Lookups that failed and were counted as not present.
    pub lookup_failures: usize,
    /// Emails not looked up because of `max_lookups`.
    pub skipped: usize,
}

/// Tuning for [`OverlapChecker`].
#[derive(Debug, Clone)]
pub struct OverlapOptions {
    pub concurrency: usize,
    pub batch_delay: Duration,
    /// Upper bound on remote lookups per check.
    pub max_lookups: Option<usize>,
}

impl Default for OverlapOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_OVERLAP_CONCURRENCY,
            batch_delay: DEFAULT_OVERLAP_BATCH_DELAY,
            max_lookups: None,
        }
    }
}

/// Errors from an enrichment-run store.
#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("Enrichment run not found: {0}")]
    NotFound(String),

    #[error("Enrichment run store error: {0}")]
    Backend(String),
}

/// Errors from [`OverlapChecker::check_run`].
#[derive(Debug, Error)]
pub enum OverlapError {
    #[error(transparent)]
    Lookup(#[from] CrmError),

    #[error(transparent)]
    Run(#[from] RunStoreError),
}

/// Source of the candidate contacts of an enrichment run.
#[async_trait]
pub trait EnrichmentRunStore: Send + Sync {
    async fn candidates(&self, run_id: &str) -> Result<Vec<CandidateContact>, RunStoreError>;
}

/// In-memory [`EnrichmentRunStore`].
#[derive(Debug, Clone, Default)]
pub struct StaticRunStore {
    runs: HashMap<String, Vec<CandidateContact>>,
}

impl StaticRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(mut self, run_id: impl Into<String>, contacts: Vec<CandidateContact>) -> Self {
        self.runs.insert(run_id.into(), contacts);
        self
    }
}

#[async_trait]
impl EnrichmentRunStore for StaticRunStore {
    async fn candidates(&self, run_id: &str) -> Result<Vec<CandidateContact>, RunStoreError> {
        self.runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| RunStoreError::NotFound(run_id.to_string()))
    }
}

/// Checks candidate contacts for existence in the CRM.
#[derive(Clone)]
pub struct OverlapChecker {
    lookup: Arc<dyn ContactLookup>,
    options: OverlapOptions,
    cancel: CancellationToken,
}

impl OverlapChecker {
    pub fn new(lookup: Arc<dyn ContactLookup>, options: OverlapOptions) -> Self {
        Self {
            lookup,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_options(mut self, options: OverlapOptions) -> Self {
        self.options = options;
        self
    }

    /// Look up every distinct candidate email.
    pub async fn check_overlap(
        &self,
        contacts: &[CandidateContact],
    ) -> Result<OverlapResult, CrmError> {
        // (normalized key, first spelling given)
        let mut seen = HashSet::new();
        let emails: Vec<(String, &str)> = contacts
            .iter()
            .filter_map(|c| {
                let given = c.email.as_deref()?;
                normalize_email(given).map(|key| (key, given))
            })
            .filter(|(key, _)| seen.insert(key.clone()))
            .collect();
        let keys: Vec<String> = emails.iter().map(|(key, _)| key.clone()).collect();

        let limit = self.options.max_lookups.unwrap_or(usize::MAX).min(keys.len());
        let (to_check, unchecked) = keys.split_at(limit);

        let mut result = OverlapResult {
            total_count: contacts.len(),
            skipped: unchecked.len(),
            ..Default::default()
        };
        if !unchecked.is_empty() {
            tracing::warn!(
                skipped = unchecked.len(),
                max_lookups = limit,
                "overlap check capped; remaining emails reported as not present"
            );
        }

        let chunk_size = self.options.concurrency.max(1);
        for (index, chunk) in to_check.chunks(chunk_size).enumerate() {
            if index > 0 && !self.options.batch_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(CrmError::Cancelled),
                    _ = tokio::time::sleep(self.options.batch_delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return Err(CrmError::Cancelled);
            }
            self.check_chunk(chunk, &mut result).await?;
        }

        let answers = std::mem::take(&mut result.checked);
        for (key, given) in emails {
            let exists = answers.get(&key).copied().unwrap_or(false);
            result.checked.insert(given.to_string(), exists);
            if exists {
                result.existing_emails.push(given.to_string());
            }
        }
        result.existing_count = result.existing_emails.len();

        tracing::info!(
            total = result.total_count,
            existing = result.existing_count,
            failures = result.lookup_failures,
            skipped = result.skipped,
            "overlap check finished"
        );
        Ok(result)
    }

    /// Check the candidates of one enrichment run.
    pub async fn check_run(
        &self,
        store: &dyn EnrichmentRunStore,
        run_id: &str,
    ) -> Result<OverlapResult, OverlapError> {
        let contacts = store.candidates(run_id).await?;
        tracing::debug!(run_id, candidates = contacts.len(), "checking enrichment run");
        Ok(self.check_overlap(&contacts).await?)
    }

    async fn check_chunk(&self, chunk: &[String], result: &mut OverlapResult) -> Result<(), CrmError> {
        let mut join_set: JoinSet<(String, Result<bool, CrmError>)> = JoinSet::new();
        for email in chunk {
            let lookup = Arc::clone(&self.lookup);
            let email = email.clone();
            join_set.spawn(async move {
                let exists = lookup.email_exists(&email).await;
                (email, exists)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((email, Ok(exists))) => {
                    result.checked.insert(email, exists);
                }
                Ok((_, Err(e))) if e.is_auth_failure() || matches!(e, CrmError::Cancelled) => {
                    join_set.abort_all();
                    return Err(e);
                }
                Ok((email, Err(e))) => {
                    tracing::warn!(email = %email, error = %e, "overlap lookup failed");
                    result.lookup_failures += 1;
                    result.checked.insert(email, false);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "overlap lookup task failed");
                    result.lookup_failures += 1;
                }
            }
        }
        Ok(())
    }
}
