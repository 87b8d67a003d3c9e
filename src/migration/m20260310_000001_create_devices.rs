//! Migration: Create devices table.
//!
//! Devices are the schedulable execution resources the allocator hands out.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
pub enum Devices {
    Table,
    Id,
    DeviceId,
    DeviceType,
    Status,
    MaxConcurrentJobs,
    CurrentJobs,
    Location,
    Capabilities,
    LastHealthCheck,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .col(
                        ColumnDef::new(Devices::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Devices::DeviceId)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Devices::DeviceType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Devices::Status)
                            .string_len(20)
                            .not_null()
                            .default("available"),
                    )
                    .col(
                        ColumnDef::new(Devices::MaxConcurrentJobs)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Devices::CurrentJobs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Devices::Location).string_len(255))
                    .col(ColumnDef::new(Devices::Capabilities).json_binary())
                    .col(
                        ColumnDef::new(Devices::LastHealthCheck)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Devices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Allocation queries filter on (device_type, status)
        manager
            .create_index(
                Index::create()
                    .name("idx_devices_type_status")
                    .table(Devices::Table)
                    .col(Devices::DeviceType)
                    .col(Devices::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await?;

        Ok(())
    }
}
