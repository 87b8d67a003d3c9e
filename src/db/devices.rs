//! Database queries for devices.
//!
//! Occupancy accounting (`current_jobs`, `status`) is mutated exclusively
//! through the conditional updates here, keeping the capacity invariant
//! `0 <= current_jobs <= max_concurrent_jobs` under concurrent workers.

use chrono::Utc;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entity::device::{self, ActiveModel, Entity as Device};
use crate::error::{AppError, AppResult};
use crate::models::{CreateDeviceRequest, DeviceStatus, TargetType};

use super::DbPool;

impl DbPool {
    /// Register a new device in the pool.
    pub async fn insert_device(&self, req: &CreateDeviceRequest) -> AppResult<device::Model> {
        let now = Utc::now();

        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            device_id: Set(req.device_id.clone()),
            device_type: Set(req.device_type.as_str().to_string()),
            status: Set(DeviceStatus::Available.as_str().to_string()),
            max_concurrent_jobs: Set(req.max_concurrent_jobs),
            current_jobs: Set(0),
            location: Set(req.location.clone()),
            capabilities: Set(req.capabilities.clone()),
            last_health_check: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert device: {}", e)))?;

        Ok(result)
    }

    /// Get a device by row ID.
    pub async fn get_device_by_id(&self, id: Uuid) -> AppResult<Option<device::Model>> {
        let result = Device::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get device: {}", e)))?;

        Ok(result)
    }

    /// Get a device by its unique external name.
    pub async fn get_device_by_name(&self, device_id: &str) -> AppResult<Option<device::Model>> {
        let result = Device::find()
            .filter(device::Column::DeviceId.eq(device_id))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get device by name: {}", e)))?;

        Ok(result)
    }

    /// List every registered device.
    pub async fn list_devices(&self) -> AppResult<Vec<device::Model>> {
        let result = Device::find()
            .order_by_asc(device::Column::DeviceId)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list devices: {}", e)))?;

        Ok(result)
    }

    /// Remove a device from the pool.
    pub async fn delete_device(&self, id: Uuid) -> AppResult<()> {
        Device::delete_by_id(id)
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete device: {}", e)))?;

        Ok(())
    }

    /// Devices of a type that can accept a job right now.
    pub async fn find_available_devices(
        &self,
        target: TargetType,
    ) -> AppResult<Vec<device::Model>> {
        let result = Device::find()
            .filter(device::Column::DeviceType.eq(target.as_str()))
            .filter(device::Column::Status.eq(DeviceStatus::Available.as_str()))
            .filter(
                Expr::col(device::Column::CurrentJobs)
                    .lt(Expr::col(device::Column::MaxConcurrentJobs)),
            )
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find available devices: {}", e)))?;

        Ok(result)
    }

    /// Busy devices of a type - the preemption scan set.
    pub async fn find_busy_devices(&self, target: TargetType) -> AppResult<Vec<device::Model>> {
        let result = Device::find()
            .filter(device::Column::DeviceType.eq(target.as_str()))
            .filter(device::Column::Status.eq(DeviceStatus::Busy.as_str()))
            .order_by_asc(device::Column::DeviceId)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find busy devices: {}", e)))?;

        Ok(result)
    }

    /// All devices of a type regardless of status.
    pub async fn find_devices_by_type(&self, target: TargetType) -> AppResult<Vec<device::Model>> {
        let result = Device::find()
            .filter(device::Column::DeviceType.eq(target.as_str()))
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find devices by type: {}", e)))?;

        Ok(result)
    }

    /// Atomically reserve one unit of occupancy on a device. The increment is
    /// guarded by spare capacity and the device being in rotation, so two
    /// racing allocations can never oversubscribe it. Flips the device to
    /// `busy` when the reservation fills it. Returns false when the slot was
    /// lost to a race (or the device left rotation).
    pub async fn try_reserve_slot(&self, id: Uuid) -> AppResult<bool> {
        let result = Device::update_many()
            .col_expr(
                device::Column::CurrentJobs,
                Expr::col(device::Column::CurrentJobs).add(1),
            )
            .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(device::Column::Id.eq(id))
            .filter(device::Column::Status.is_in([
                DeviceStatus::Available.as_str(),
                DeviceStatus::Busy.as_str(),
            ]))
            .filter(
                Expr::col(device::Column::CurrentJobs)
                    .lt(Expr::col(device::Column::MaxConcurrentJobs)),
            )
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to reserve device slot: {}", e)))?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        self.mark_busy_if_full(id).await?;
        Ok(true)
    }

    /// Release one unit of occupancy, floored at zero, and bring a `busy`
    /// device back to `available` once it has spare capacity again.
    /// Returns false when the device does not exist.
    pub async fn release_slot(&self, id: Uuid) -> AppResult<bool> {
        if self.get_device_by_id(id).await?.is_none() {
            return Ok(false);
        }

        Device::update_many()
            .col_expr(
                device::Column::CurrentJobs,
                Expr::col(device::Column::CurrentJobs).sub(1),
            )
            .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(device::Column::Id.eq(id))
            .filter(Expr::col(device::Column::CurrentJobs).gt(0))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to release device slot: {}", e)))?;

        self.mark_available_if_below_capacity(id).await?;
        Ok(true)
    }

    /// Drop `count` units of occupancy after a preemption sweep and mark the
    /// device available when it empties out entirely.
    pub async fn release_preempted_slots(&self, id: Uuid, count: u64) -> AppResult<()> {
        Device::update_many()
            .col_expr(
                device::Column::CurrentJobs,
                Expr::col(device::Column::CurrentJobs).sub(count as i32),
            )
            .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(device::Column::Id.eq(id))
            .filter(Expr::col(device::Column::CurrentJobs).gte(count as i32))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to release preempted slots: {}", e)))?;

        Device::update_many()
            .col_expr(
                device::Column::Status,
                Expr::value(DeviceStatus::Available.as_str()),
            )
            .filter(device::Column::Id.eq(id))
            .filter(device::Column::Status.eq(DeviceStatus::Busy.as_str()))
            .filter(device::Column::CurrentJobs.eq(0))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to reset preempted device: {}", e)))?;

        Ok(())
    }

    /// Flip the device to `busy` once occupancy reaches capacity.
    async fn mark_busy_if_full(&self, id: Uuid) -> AppResult<()> {
        Device::update_many()
            .col_expr(
                device::Column::Status,
                Expr::value(DeviceStatus::Busy.as_str()),
            )
            .filter(device::Column::Id.eq(id))
            .filter(device::Column::Status.eq(DeviceStatus::Available.as_str()))
            .filter(
                Expr::col(device::Column::CurrentJobs)
                    .gte(Expr::col(device::Column::MaxConcurrentJobs)),
            )
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to mark device busy: {}", e)))?;

        Ok(())
    }

    /// Flip a `busy` device back to `available` once below capacity.
    async fn mark_available_if_below_capacity(&self, id: Uuid) -> AppResult<()> {
        Device::update_many()
            .col_expr(
                device::Column::Status,
                Expr::value(DeviceStatus::Available.as_str()),
            )
            .filter(device::Column::Id.eq(id))
            .filter(device::Column::Status.eq(DeviceStatus::Busy.as_str()))
            .filter(
                Expr::col(device::Column::CurrentJobs)
                    .lt(Expr::col(device::Column::MaxConcurrentJobs)),
            )
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to mark device available: {}", e)))?;

        Ok(())
    }

    /// Record a health-check result, updating status and the probe timestamp.
    pub async fn record_health_check(
        &self,
        id: Uuid,
        status: Option<DeviceStatus>,
    ) -> AppResult<()> {
        let mut update = Device::update_many()
            .col_expr(device::Column::LastHealthCheck, Expr::value(Utc::now()))
            .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(device::Column::Id.eq(id));

        if let Some(status) = status {
            update = update.col_expr(device::Column::Status, Expr::value(status.as_str()));
        }

        update
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to record health check: {}", e)))?;

        Ok(())
    }
}
