//! Migration: Create jobs table.
//!
//! Jobs are units of requested test execution. A job references its device
//! only while running; preemption clears the reference and requeues the job.

use sea_orm_migration::prelude::*;

use super::m20260310_000001_create_devices::Devices;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
pub enum Jobs {
    Table,
    Id,
    OrgId,
    AppVersionId,
    TestPath,
    Priority,
    Target,
    Status,
    DeviceId,
    AssignedDeviceName,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::OrgId).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Jobs::AppVersionId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Jobs::TestPath).text().not_null())
                    .col(
                        ColumnDef::new(Jobs::Priority)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Jobs::Target).string_len(20).not_null())
                    .col(
                        ColumnDef::new(Jobs::Status)
                            .string_len(20)
                            .not_null()
                            .default("queued"),
                    )
                    .col(ColumnDef::new(Jobs::DeviceId).uuid())
                    .col(ColumnDef::new(Jobs::AssignedDeviceName).string_len(255))
                    .col(ColumnDef::new(Jobs::ErrorMessage).text())
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jobs_device_id")
                            .from(Jobs::Table, Jobs::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Batch claims filter on (app_version_id, target, status)
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_batch_key")
                    .table(Jobs::Table)
                    .col(Jobs::AppVersionId)
                    .col(Jobs::Target)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        // Preemption scans filter on (device_id, status)
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_device_status")
                    .table(Jobs::Table)
                    .col(Jobs::DeviceId)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        // Queue introspection counts by (priority, status)
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_priority_status")
                    .table(Jobs::Table)
                    .col(Jobs::Priority)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await?;

        Ok(())
    }
}
