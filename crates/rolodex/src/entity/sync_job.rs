//! SyncJob entity - durable record of one mirror run.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::sync_status::SyncStatus;

/// A batch synchronization job.
///
/// The row is the only source of truth for progress; every write is a
/// compare-and-set on `revision`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    /// Who asked for the run (free-form profile name).
    pub requested_by: Option<String>,
    pub status: SyncStatus,

    // ─── Options ─────────────────────────────────────────────────────────────
    pub batch_size: i32,
    #[sea_orm(default_value = false)]
    pub include_deleted: bool,
    pub max_batches_per_invocation: i32,
    /// Optional cap on the number of records fetched by this job.
    pub max_contacts: Option<i64>,

    // ─── Progress ────────────────────────────────────────────────────────────
    /// Offset of the next record to fetch.
    pub next_start: i64,
    pub total_expected: Option<i64>,
    pub total_synced: i64,
    pub total_rejected: i64,
    pub batches_processed: i64,
    pub last_batch_size: i32,

    // ─── Lifecycle ───────────────────────────────────────────────────────────
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,
    pub heartbeat_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub metadata: serde_json::Value,

    /// Optimistic concurrency counter.
    pub revision: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Id of the job whose cursor this job inherited, if any.
    pub fn resumed_from(&self) -> Option<Uuid> {
        self.metadata
            .get("resumed_from")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Remaining fetch allowance under `max_contacts`, if capped.
    pub fn remaining_allowance(&self) -> Option<i64> {
        self.max_contacts
            .map(|max| max.saturating_sub(self.next_start).max(0))
    }
}
