//! Common re-exports for convenient entity usage.

pub use super::crm_token::{
    ActiveModel as CrmTokenActiveModel, Column as CrmTokenColumn, Entity as CrmToken,
    Model as TokenRecord,
};
pub use super::mirror_contact::{
    ActiveModel as MirrorContactActiveModel, Column as MirrorContactColumn,
    Entity as MirrorContact, Model as MirrorContactModel,
};
pub use super::sync_job::{
    ActiveModel as SyncJobActiveModel, Column as SyncJobColumn, Entity as SyncJobEntity,
    Model as SyncJob,
};
pub use super::sync_status::SyncStatus;
