//! Read helpers over the mirror table.

use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};

use crate::entity::mirror_contact::{Column, Entity as MirrorContact, Model};

use super::record::normalize_email;

/// Number of mirrored contacts.
pub async fn count(db: &DatabaseConnection) -> Result<u64, DbErr> {
    MirrorContact::find().count(db).await
}

/// Find a contact by its CRM record id.
pub async fn find_by_remote_id(
    db: &DatabaseConnection,
    remote_id: i64,
) -> Result<Option<Model>, DbErr> {
    MirrorContact::find()
        .filter(Column::RemoteId.eq(remote_id))
        .one(db)
        .await
}

/// Find the oldest contact with this email (normalized before matching).
pub async fn find_by_email(db: &DatabaseConnection, email: &str) -> Result<Option<Model>, DbErr> {
    let Some(email) = normalize_email(email) else {
        return Ok(None);
    };
    MirrorContact::find()
        .filter(Column::Email.eq(email))
        .order_by_asc(Column::FirstSyncedAt)
        .one(db)
        .await
}

/// Find a contact with this email that has no CRM id yet.
pub(crate) async fn find_unkeyed_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<Model>, DbErr> {
    MirrorContact::find()
        .filter(Column::Email.eq(email))
        .filter(Column::RemoteId.is_null())
        .order_by_asc(Column::FirstSyncedAt)
        .one(db)
        .await
}
