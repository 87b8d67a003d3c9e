//! Job entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: String,
    /// Application build identifier; the batching key together with `target`.
    pub app_version_id: String,
    pub test_path: String,
    /// Priority 1-5, higher is more urgent.
    pub priority: i32,
    /// Execution target: emulator, device, browserstack.
    pub target: String,
    /// Status: queued, running, completed, failed.
    pub status: String,
    /// Assigned device row; non-null exactly while running.
    pub device_id: Option<Uuid>,
    /// Denormalized device name for display.
    pub assigned_device_name: Option<String>,
    /// Error message recorded on terminal failure.
    pub error_message: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id",
        on_delete = "SetNull"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
