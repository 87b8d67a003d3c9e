//! Device domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::TargetType;

/// Device status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Accepting jobs, spare capacity remains.
    Available,
    /// At full capacity.
    Busy,
    /// Unreachable; excluded from allocation.
    Offline,
    /// Taken out of rotation by an operator.
    Maintenance,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to register a device in the pool.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    /// Unique external device name, e.g. "emulator-1".
    pub device_id: String,
    /// Device type; matches job targets.
    pub device_type: TargetType,
    /// How many jobs can run simultaneously.
    #[serde(default = "default_capacity")]
    pub max_concurrent_jobs: i32,
    /// Optional datacenter or region label.
    #[serde(default)]
    pub location: Option<String>,
    /// Optional capabilities document.
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
}

fn default_capacity() -> i32 {
    1
}

impl CreateDeviceRequest {
    /// Validate the registration request.
    pub fn validate(&self) -> Result<(), String> {
        if self.device_id.trim().is_empty() {
            return Err("device_id must not be empty".to_string());
        }
        if self.max_concurrent_jobs < 1 {
            return Err(format!(
                "max_concurrent_jobs must be at least 1, got {}",
                self.max_concurrent_jobs
            ));
        }
        Ok(())
    }
}

/// Response after registering a device.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateDeviceResponse {
    /// Device row UUID.
    pub id: Uuid,
    /// External device name.
    pub device_id: String,
    /// Initial status (always `available`).
    pub status: DeviceStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Detailed device state for listings and pool status.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceDetail {
    /// Device row UUID.
    pub id: Uuid,
    /// External device name.
    pub device_id: String,
    /// Device type.
    pub device_type: TargetType,
    /// Current status.
    pub status: DeviceStatus,
    /// Running job count.
    pub current_jobs: i32,
    /// Capacity.
    pub max_concurrent_jobs: i32,
    /// Occupancy as a percentage of capacity.
    pub utilization_percent: f64,
    /// Whether the device can accept another job right now.
    pub is_available: bool,
    /// Optional location label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Last health-check timestamp.
    pub last_health_check: DateTime<Utc>,
}

/// Device list response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceListResponse {
    /// All registered devices.
    pub devices: Vec<DeviceDetail>,
}

/// Aggregate stats for one device type.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct DeviceTypeStats {
    pub total: u64,
    pub available: u64,
    pub busy: u64,
    pub offline: u64,
    /// Mean utilization across devices of this type.
    pub avg_utilization: f64,
}

/// Running/queued job counts for one priority level.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PriorityAllocationStats {
    pub running_jobs: u64,
    pub queued_jobs: u64,
    /// Device types in use by running jobs of this priority.
    pub devices_by_type: HashMap<String, u64>,
}

/// Pool-wide allocator status.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PoolStatusResponse {
    pub total_devices: u64,
    pub available_devices: u64,
    pub busy_devices: u64,
    pub offline_devices: u64,
    /// Per-type breakdown keyed by device type name.
    pub by_type: HashMap<String, DeviceTypeStats>,
    /// Per-priority allocation stats keyed by `priority_N`.
    pub priority_allocation: HashMap<String, PriorityAllocationStats>,
    /// Per-device details.
    pub devices: Vec<DeviceDetail>,
}

/// Advisory outcome of a recommendation query. Never mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// A device can be allocated right now.
    ImmediateAllocation,
    /// No free device, but a high-priority request could preempt.
    PreemptionAvailable,
    /// All devices busy; wait for a slot.
    QueueAndWait,
    /// Devices exist but none are reachable.
    DevicesOffline,
    /// No devices of this type are configured.
    NoDevicesAvailable,
}

/// Recommendation response with estimated wait.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecommendationResponse {
    /// The advisory verdict.
    pub recommendation: Recommendation,
    /// Human-readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Best candidate device name, when immediate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Candidate utilization, when immediate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_utilization: Option<f64>,
    /// Estimated wait in seconds; absent when unknowable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_time: Option<u64>,
    /// Whether the requesting priority gets preferential treatment.
    pub priority_advantage: bool,
}

/// Per-device health probe result.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthCheckDetail {
    pub device_id: String,
    pub status: DeviceStatus,
    pub healthy: bool,
}

/// Fleet health-check response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub total_checked: u64,
    pub healthy: u64,
    pub unhealthy: u64,
    pub details: Vec<HealthCheckDetail>,
}
