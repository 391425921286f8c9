//! MirrorContact entity - local copy of a CRM contact.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A mirrored contact, keyed by the CRM's record id and falling back to the
/// normalized email for records without one.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mirror_contacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    /// Record id in the CRM.
    #[sea_orm(unique)]
    pub remote_id: Option<i64>,
    /// Trimmed, lowercased email.
    pub email: Option<String>,

    // ─── Content ─────────────────────────────────────────────────────────────
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub phone: Option<String>,
    #[sea_orm(default_value = false)]
    pub is_deleted: bool,
    pub remote_updated_at: Option<DateTimeWithTimeZone>,
    /// Raw record as returned by the CRM.
    #[sea_orm(column_type = "Json")]
    pub payload: serde_json::Value,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub first_synced_at: DateTimeWithTimeZone,
    pub last_synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// "First Last", skipping missing parts.
    pub fn display_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
