//! Idempotent upsert of CRM records into the mirror.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, IntoActiveModel,
};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::mirror_contact::{ActiveModel, Model};

use super::errors::{MirrorError, Result, is_unique_violation};
use super::query;
use super::record::ContactFields;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Destination for fetched contact records.
#[async_trait]
pub trait MirrorSink: Send + Sync {
    async fn upsert(&self, record: &Value) -> Result<UpsertOutcome>;
}

/// [`MirrorSink`] writing to the `mirror_contacts` table.
#[derive(Clone)]
pub struct DbMirrorSink {
    db: Arc<DatabaseConnection>,
}

impl DbMirrorSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_existing(&self, fields: &ContactFields) -> Result<Option<Model>> {
        if let Some(remote_id) = fields.remote_id {
            if let Some(row) = query::find_by_remote_id(&self.db, remote_id).await? {
                return Ok(Some(row));
            }
            // Adopt a row first mirrored without an id.
            return match &fields.email {
                Some(email) => Ok(query::find_unkeyed_by_email(&self.db, email).await?),
                None => Ok(None),
            };
        }

        match &fields.email {
            Some(email) => Ok(query::find_by_email(&self.db, email).await?),
            None => Ok(None),
        }
    }

    async fn write(&self, fields: &ContactFields, record: &Value) -> Result<UpsertOutcome> {
        let now = Utc::now().fixed_offset();

        match self.find_existing(fields).await? {
            Some(existing) => {
                let mut active = existing.into_active_model();
                if let Some(remote_id) = fields.remote_id {
                    active.remote_id = Set(Some(remote_id));
                }
                if fields.email.is_some() {
                    active.email = Set(fields.email.clone());
                }
                apply(&mut active, fields, record);
                active.last_synced_at = Set(now);
                active.update(self.db.as_ref()).await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let mut active = ActiveModel {
                    id: Set(Uuid::new_v4()),
                    remote_id: Set(fields.remote_id),
                    email: Set(fields.email.clone()),
                    first_synced_at: Set(now),
                    last_synced_at: Set(now),
                    ..Default::default()
                };
                apply(&mut active, fields, record);
                active.insert(self.db.as_ref()).await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }
}

fn apply(active: &mut ActiveModel, fields: &ContactFields, record: &Value) {
    active.first_name = Set(fields.first_name.clone());
    active.last_name = Set(fields.last_name.clone());
    active.company_name = Set(fields.company_name.clone());
    active.phone = Set(fields.phone.clone());
    active.is_deleted = Set(fields.is_deleted);
    active.remote_updated_at = Set(fields.remote_updated_at);
    active.payload = Set(record.clone());
}

#[async_trait]
impl MirrorSink for DbMirrorSink {
    async fn upsert(&self, record: &Value) -> Result<UpsertOutcome> {
        let fields = ContactFields::from_record(record)?;

        match self.write(&fields, record).await {
            Err(MirrorError::Database(e)) if is_unique_violation(&e) => {
                tracing::debug!(remote_id = ?fields.remote_id, "concurrent insert won, updating instead");
                self.write(&fields, record).await
            }
            other => other,
        }
    }
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use super::*;
    use crate::testing::memory_db;
    use serde_json::json;

    #[tokio::test]
    async fn same_record_twice_yields_one_row() {
        let db = memory_db().await;
        let sink = DbMirrorSink::new(db.clone());
        let record = json!({"id": 1, "email": "A@x.com", "firstName": "Ann"});

        assert_eq!(sink.upsert(&record).await.unwrap(), UpsertOutcome::Inserted);
        let first = query::find_by_remote_id(&db, 1).await.unwrap().unwrap();

        assert_eq!(sink.upsert(&record).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(query::count(&db).await.unwrap(), 1);

        let second = query::find_by_remote_id(&db, 1).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.first_synced_at, first.first_synced_at);
        assert_eq!(second.email.as_deref(), Some("a@x.com"));
        assert_eq!(second.payload, record);
    }

    #[tokio::test]
    async fn changed_fields_are_updated() {
        let db = memory_db().await;
        let sink = DbMirrorSink::new(db.clone());
        sink.upsert(&json!({"id": 5, "lastName": "Old"})).await.unwrap();
        sink.upsert(&json!({"id": 5, "lastName": "New", "isDeleted": true}))
            .await
            .unwrap();

        let row = query::find_by_remote_id(&db, 5).await.unwrap().unwrap();
        assert_eq!(row.last_name.as_deref(), Some("New"));
        assert!(row.is_deleted);
    }

    #[tokio::test]
    async fn email_only_record_is_adopted_when_id_appears() {
        let db = memory_db().await;
        let sink = DbMirrorSink::new(db.clone());

        sink.upsert(&json!({"email": "b@x.com"})).await.unwrap();
        assert_eq!(
            sink.upsert(&json!({"email": " B@X.com "})).await.unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(
            sink.upsert(&json!({"id": 9, "email": "b@x.com"})).await.unwrap(),
            UpsertOutcome::Updated
        );

        assert_eq!(query::count(&db).await.unwrap(), 1);
        let row = query::find_by_email(&db, "b@x.com").await.unwrap().unwrap();
        assert_eq!(row.remote_id, Some(9));
    }

    #[tokio::test]
    async fn distinct_ids_sharing_an_email_stay_distinct() {
        let db = memory_db().await;
        let sink = DbMirrorSink::new(db.clone());
        sink.upsert(&json!({"id": 1, "email": "team@x.com"})).await.unwrap();
        sink.upsert(&json!({"id": 2, "email": "team@x.com"})).await.unwrap();
        assert_eq!(query::count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn keyless_record_is_rejected_without_writing() {
        let db = memory_db().await;
        let sink = DbMirrorSink::new(db.clone());

        let err = sink
            .upsert(&json!({"firstName": "Ghost"}))
            .await
            .expect_err("no key");
        assert!(err.is_record_level());
        assert_eq!(query::count(&db).await.unwrap(), 0);
    }
}
