//! Initial migration to create the rolodex database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_crm_tokens(manager).await?;
        self.create_sync_jobs(manager).await?;
        self.create_mirror_contacts(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MirrorContacts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrmTokens::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_crm_tokens(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrmTokens::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CrmTokens::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CrmTokens::AccessToken).text().not_null())
                    .col(ColumnDef::new(CrmTokens::RefreshToken).text().null())
                    .col(ColumnDef::new(CrmTokens::RestBaseUrl).text().not_null())
                    .col(ColumnDef::new(CrmTokens::SessionToken).text().not_null())
                    .col(
                        ColumnDef::new(CrmTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CrmTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_sync_jobs(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncJobs::RequestedBy).string().null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .string_len(16)
                            .not_null()
                            .default("queued"),
                    )
                    // Options
                    .col(ColumnDef::new(SyncJobs::BatchSize).integer().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::IncludeDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::MaxBatchesPerInvocation)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncJobs::MaxContacts).big_integer().null())
                    // Progress
                    .col(
                        ColumnDef::new(SyncJobs::NextStart)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::TotalExpected).big_integer().null())
                    .col(
                        ColumnDef::new(SyncJobs::TotalSynced)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::TotalRejected)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::BatchesProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::LastBatchSize)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    // Lifecycle
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::HeartbeatAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::LastError).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::Metadata)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // Listing newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_created")
                    .table(SyncJobs::Table)
                    .col((SyncJobs::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // Stale-job scans
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_status_heartbeat")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .col(SyncJobs::HeartbeatAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_mirror_contacts(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MirrorContacts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MirrorContacts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MirrorContacts::RemoteId).big_integer().null())
                    .col(ColumnDef::new(MirrorContacts::Email).string().null())
                    .col(ColumnDef::new(MirrorContacts::FirstName).string().null())
                    .col(ColumnDef::new(MirrorContacts::LastName).string().null())
                    .col(ColumnDef::new(MirrorContacts::CompanyName).string().null())
                    .col(ColumnDef::new(MirrorContacts::Phone).string().null())
                    .col(
                        ColumnDef::new(MirrorContacts::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MirrorContacts::RemoteUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MirrorContacts::Payload)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(MirrorContacts::FirstSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MirrorContacts::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key; NULLs are not considered equal
        manager
            .create_index(
                Index::create()
                    .name("idx_mirror_contacts_remote_id")
                    .table(MirrorContacts::Table)
                    .col(MirrorContacts::RemoteId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mirror_contacts_email")
                    .table(MirrorContacts::Table)
                    .col(MirrorContacts::Email)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "crm_tokens")]
enum CrmTokens {
    Table,
    Id,
    AccessToken,
    RefreshToken,
    RestBaseUrl,
    SessionToken,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "sync_jobs")]
enum SyncJobs {
    Table,
    Id,
    CreatedAt,
    UpdatedAt,
    RequestedBy,
    Status,
    BatchSize,
    IncludeDeleted,
    MaxBatchesPerInvocation,
    MaxContacts,
    NextStart,
    TotalExpected,
    TotalSynced,
    TotalRejected,
    BatchesProcessed,
    LastBatchSize,
    StartedAt,
    FinishedAt,
    HeartbeatAt,
    LastError,
    Metadata,
    Revision,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "mirror_contacts")]
enum MirrorContacts {
    Table,
    Id,
    RemoteId,
    Email,
    FirstName,
    LastName,
    CompanyName,
    Phone,
    IsDeleted,
    RemoteUpdatedAt,
    Payload,
    FirstSyncedAt,
    LastSyncedAt,
}
