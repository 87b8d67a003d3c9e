//! Device entity for SeaORM.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Unique external device name, e.g. "emulator-1".
    #[sea_orm(unique)]
    pub device_id: String,
    /// Device type; matches job targets.
    pub device_type: String,
    /// Status: available, busy, offline, maintenance.
    pub status: String,
    /// Capacity, at least 1.
    pub max_concurrent_jobs: i32,
    /// Occupancy counter, bounded by capacity at rest.
    pub current_jobs: i32,
    pub location: Option<String>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub capabilities: Option<JsonValue>,
    pub last_health_check: DateTimeUtc,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job::Entity")]
    Jobs,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Jobs.def()
    }
}

impl Model {
    /// Whether the device can accept another job right now.
    pub fn is_available(&self) -> bool {
        self.status == "available" && self.current_jobs < self.max_concurrent_jobs
    }

    /// Occupancy as a percentage of capacity.
    pub fn utilization_percent(&self) -> f64 {
        if self.max_concurrent_jobs == 0 {
            return 0.0;
        }
        (self.current_jobs as f64 / self.max_concurrent_jobs as f64) * 100.0
    }
}

impl ActiveModelBehavior for ActiveModel {}
