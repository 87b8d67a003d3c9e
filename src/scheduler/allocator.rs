//! Device allocation.
//!
//! Selects, preempts, and releases devices under priority contention. All
//! occupancy mutations go through the conditional updates in the db layer,
//! so losing a race surfaces as a failed reservation rather than an
//! oversubscribed device. Allocation failures never propagate past this
//! module; they degrade to "no device" for the caller to resolve.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entity::device;
use crate::error::AppResult;
use crate::models::{
    DeviceDetail, DeviceStatus, DeviceTypeStats, HealthCheckDetail, HealthCheckResponse,
    JobStatus, ListJobsQuery, PoolStatusResponse, PriorityAllocationStats, Recommendation,
    RecommendationResponse, TargetType,
};

/// Preemption is only attempted at or above this priority.
const PREEMPTION_MIN_PRIORITY: i32 = 4;

/// Assumed average job duration for wait-time estimates, in seconds.
const AVG_JOB_DURATION_SECS: u64 = 30;

/// Nominal time to complete a preemption, in seconds.
const PREEMPTION_WAIT_SECS: u64 = 5;

/// Health probe capability. The default implementation reports every device
/// healthy; a real probe would ping the device or its farm API.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn check(&self, device: &device::Model) -> bool;
}

/// Trivial probe that never fails a device.
pub struct AlwaysHealthy;

#[async_trait]
impl DeviceProbe for AlwaysHealthy {
    async fn check(&self, _device: &device::Model) -> bool {
        true
    }
}

/// Manages device allocation and status for test execution.
pub struct DeviceAllocator<'a> {
    db: &'a DbPool,
}

impl<'a> DeviceAllocator<'a> {
    pub fn new(db: &'a DbPool) -> Self {
        Self { db }
    }

    /// Allocate an available device for the given target type, applying the
    /// priority-aware selection policy and falling back to preemption for
    /// high-priority requests. Returns None when nothing can be freed.
    pub async fn allocate(&self, target: TargetType, priority: i32) -> Option<device::Model> {
        match self.allocate_inner(target, priority).await {
            Ok(device) => device,
            Err(e) => {
                error!("Error allocating device: {}", e);
                None
            }
        }
    }

    async fn allocate_inner(
        &self,
        target: TargetType,
        priority: i32,
    ) -> AppResult<Option<device::Model>> {
        let mut available = self.db.find_available_devices(target).await?;

        if available.is_empty() {
            if priority >= PREEMPTION_MIN_PRIORITY {
                info!(
                    "No available devices for priority {} job, checking for preemption opportunities",
                    priority
                );
                if let Some(device) = self.try_preempt(target, priority).await? {
                    return Ok(Some(device));
                }
            }

            warn!(
                "No available devices of type {} for priority {}",
                target, priority
            );
            return Ok(None);
        }

        sort_by_allocation_policy(&mut available, priority);

        // Reserve the best candidate; on a lost race fall through to the next.
        for candidate in available {
            if self.db.try_reserve_slot(candidate.id).await? {
                let device = self
                    .db
                    .get_device_by_id(candidate.id)
                    .await?
                    .unwrap_or(candidate);
                info!(
                    "Allocated device {} for {} job (priority: {}, utilization: {:.0}%)",
                    device.device_id,
                    target,
                    priority,
                    device.utilization_percent()
                );
                return Ok(Some(device));
            }
        }

        warn!(
            "All {} candidates were claimed concurrently for priority {}",
            target, priority
        );
        Ok(None)
    }

    /// Try to free a busy device by reverting significantly lower-priority
    /// running jobs back to the queue. Eager first-match scan: preemption is
    /// a rare tail-latency mitigation, not the common path. The freed slot is
    /// reserved for the incoming job before the device is returned, so its
    /// unit of load shows up in `current_jobs` like any other allocation.
    async fn try_preempt(
        &self,
        target: TargetType,
        priority: i32,
    ) -> AppResult<Option<device::Model>> {
        if priority < PREEMPTION_MIN_PRIORITY {
            return Ok(None);
        }

        let busy_devices = self.db.find_busy_devices(target).await?;

        for busy in busy_devices {
            // Only preempt jobs at least two levels below the requester,
            // avoiding thrash between adjacent tiers.
            let requeued = self
                .db
                .requeue_preempted_jobs(busy.id, priority - 1)
                .await?;

            if requeued == 0 {
                continue;
            }

            info!(
                "Preempting {} lower priority jobs on device {}",
                requeued, busy.device_id
            );

            self.db.release_preempted_slots(busy.id, requeued).await?;

            if !self.db.try_reserve_slot(busy.id).await? {
                // The freed capacity was snatched by a concurrent allocation;
                // keep scanning.
                warn!(
                    "Preempted capacity on {} was claimed concurrently",
                    busy.device_id
                );
                continue;
            }

            let device = self.db.get_device_by_id(busy.id).await?.unwrap_or(busy);
            info!(
                "Successfully preempted device {} for high priority job",
                device.device_id
            );
            return Ok(Some(device));
        }

        Ok(None)
    }

    /// Release a device after batch completion. Idempotent against a missing
    /// device; never raises.
    pub async fn release(&self, device_row_id: Uuid) {
        match self.db.release_slot(device_row_id).await {
            Ok(true) => {
                if let Ok(Some(device)) = self.db.get_device_by_id(device_row_id).await {
                    info!(
                        "Released device {} (utilization: {:.0}%)",
                        device.device_id,
                        device.utilization_percent()
                    );
                }
            }
            Ok(false) => {
                warn!("Device {} not found for release", device_row_id);
            }
            Err(e) => {
                error!("Error releasing device {}: {}", device_row_id, e);
            }
        }
    }

    /// Comprehensive pool status: totals, per-type breakdown, per-priority
    /// allocation stats, and per-device details. Read-only.
    pub async fn pool_status(&self) -> AppResult<PoolStatusResponse> {
        let devices = self.db.list_devices().await?;

        let mut status = PoolStatusResponse {
            total_devices: devices.len() as u64,
            available_devices: 0,
            busy_devices: 0,
            offline_devices: 0,
            by_type: HashMap::new(),
            priority_allocation: self.priority_allocation_stats().await?,
            devices: Vec::with_capacity(devices.len()),
        };

        for device in &devices {
            let type_stats = status
                .by_type
                .entry(device.device_type.clone())
                .or_insert_with(DeviceTypeStats::default);
            type_stats.total += 1;

            match device.status.as_str() {
                "available" => {
                    status.available_devices += 1;
                    type_stats.available += 1;
                }
                "busy" => {
                    status.busy_devices += 1;
                    type_stats.busy += 1;
                }
                _ => {
                    status.offline_devices += 1;
                    type_stats.offline += 1;
                }
            }

            status.devices.push(device_detail(device));
        }

        // Average utilization by type
        for (device_type, stats) in status.by_type.iter_mut() {
            if stats.total > 0 {
                let total_utilization: f64 = status
                    .devices
                    .iter()
                    .filter(|d| d.device_type.as_str() == device_type)
                    .map(|d| d.utilization_percent)
                    .sum();
                stats.avg_utilization = total_utilization / stats.total as f64;
            }
        }

        Ok(status)
    }

    /// Per-priority running/queued counts plus the device types in use.
    async fn priority_allocation_stats(
        &self,
    ) -> AppResult<HashMap<String, PriorityAllocationStats>> {
        let devices = self.db.list_devices().await?;
        let device_types: HashMap<Uuid, String> = devices
            .iter()
            .map(|d| (d.id, d.device_type.clone()))
            .collect();

        let running = self
            .db
            .query_jobs(&ListJobsQuery {
                status: Some(JobStatus::Running.as_str().to_string()),
                limit: 500,
                ..Default::default()
            })
            .await?;

        let mut stats = HashMap::new();
        for priority in 1..=5 {
            let mut entry = PriorityAllocationStats {
                running_jobs: 0,
                queued_jobs: self.db.count_jobs(priority, JobStatus::Queued).await?,
                devices_by_type: HashMap::new(),
            };

            for job in running.iter().filter(|j| j.priority == priority) {
                entry.running_jobs += 1;
                if let Some(device_id) = job.device_id
                    && let Some(device_type) = device_types.get(&device_id)
                {
                    *entry.devices_by_type.entry(device_type.clone()).or_insert(0) += 1;
                }
            }

            stats.insert(format!("priority_{}", priority), entry);
        }

        Ok(stats)
    }

    /// Read-only allocation advisory with an estimated wait time. Never
    /// mutates state.
    pub async fn recommend(
        &self,
        target: TargetType,
        priority: i32,
    ) -> AppResult<RecommendationResponse> {
        let devices = self.db.find_devices_by_type(target).await?;

        if devices.is_empty() {
            return Ok(RecommendationResponse {
                recommendation: Recommendation::NoDevicesAvailable,
                message: Some(format!("No {} devices configured", target)),
                device_id: None,
                current_utilization: None,
                estimated_wait_time: None,
                priority_advantage: false,
            });
        }

        let mut available: Vec<device::Model> = devices
            .iter()
            .filter(|d| d.is_available())
            .cloned()
            .collect();

        if !available.is_empty() {
            sort_by_allocation_policy(&mut available, priority);
            let best = &available[0];
            return Ok(RecommendationResponse {
                recommendation: Recommendation::ImmediateAllocation,
                message: None,
                device_id: Some(best.device_id.clone()),
                current_utilization: Some(best.utilization_percent()),
                estimated_wait_time: Some(0),
                priority_advantage: priority >= PREEMPTION_MIN_PRIORITY,
            });
        }

        // Check preemption possibilities for high priority requests
        if priority >= PREEMPTION_MIN_PRIORITY {
            for busy in devices.iter().filter(|d| d.status == "busy") {
                if self
                    .db
                    .count_preemptible_jobs(busy.id, priority - 1)
                    .await?
                    > 0
                {
                    return Ok(RecommendationResponse {
                        recommendation: Recommendation::PreemptionAvailable,
                        message: Some(
                            "High priority job can preempt lower priority jobs".to_string(),
                        ),
                        device_id: None,
                        current_utilization: None,
                        estimated_wait_time: Some(PREEMPTION_WAIT_SECS),
                        priority_advantage: true,
                    });
                }
            }
        }

        let busy: Vec<&device::Model> = devices.iter().filter(|d| d.status == "busy").collect();
        if !busy.is_empty() {
            let min_load = busy.iter().map(|d| d.current_jobs.max(0) as u64).min().unwrap_or(0);
            let mut wait = min_load * AVG_JOB_DURATION_SECS;

            // High priority jumps the queue; low priority waits longer.
            if priority >= PREEMPTION_MIN_PRIORITY {
                wait /= 2;
            } else if priority == 1 {
                wait = wait * 3 / 2;
            }

            return Ok(RecommendationResponse {
                recommendation: Recommendation::QueueAndWait,
                message: Some(format!("All {} devices busy", target)),
                device_id: None,
                current_utilization: None,
                estimated_wait_time: Some(wait),
                priority_advantage: priority >= PREEMPTION_MIN_PRIORITY,
            });
        }

        Ok(RecommendationResponse {
            recommendation: Recommendation::DevicesOffline,
            message: Some(format!("All {} devices offline", target)),
            device_id: None,
            current_utilization: None,
            estimated_wait_time: None,
            priority_advantage: false,
        })
    }

    /// Probe every device and reconcile its status: healthy offline devices
    /// come back online, unhealthy in-rotation devices go offline.
    pub async fn health_check(&self, probe: &dyn DeviceProbe) -> AppResult<HealthCheckResponse> {
        let devices = self.db.list_devices().await?;

        let mut response = HealthCheckResponse {
            total_checked: devices.len() as u64,
            healthy: 0,
            unhealthy: 0,
            details: Vec::with_capacity(devices.len()),
        };

        for device in devices {
            let is_healthy = probe.check(&device).await;

            let new_status = if is_healthy && device.status == "offline" {
                info!("Device {} is back online", device.device_id);
                Some(DeviceStatus::Available)
            } else if !is_healthy && matches!(device.status.as_str(), "available" | "busy") {
                warn!("Device {} went offline", device.device_id);
                Some(DeviceStatus::Offline)
            } else {
                None
            };

            self.db.record_health_check(device.id, new_status).await?;

            let reported = new_status
                .or_else(|| DeviceStatus::parse(&device.status))
                .unwrap_or(DeviceStatus::Offline);

            response.details.push(HealthCheckDetail {
                device_id: device.device_id,
                status: reported,
                healthy: is_healthy,
            });

            if is_healthy {
                response.healthy += 1;
            } else {
                response.unhealthy += 1;
            }
        }

        Ok(response)
    }
}

/// Priority-aware selection order. Priority 2+ load-balances toward the
/// least-loaded device; priority 1 packs onto already-busy devices so idle
/// capacity stays free for future higher-priority arrivals.
fn sort_by_allocation_policy(devices: &mut [device::Model], priority: i32) {
    if priority >= 2 {
        devices.sort_by_key(|d| d.current_jobs);
    } else {
        devices.sort_by_key(|d| std::cmp::Reverse(d.current_jobs));
    }
}

/// Build the detail view for one device row.
pub fn device_detail(device: &device::Model) -> DeviceDetail {
    DeviceDetail {
        id: device.id,
        device_id: device.device_id.clone(),
        device_type: TargetType::parse(&device.device_type).unwrap_or(TargetType::Emulator),
        status: DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Offline),
        current_jobs: device.current_jobs,
        max_concurrent_jobs: device.max_concurrent_jobs,
        utilization_percent: device.utilization_percent(),
        is_available: device.is_available(),
        location: device.location.clone(),
        last_health_check: device.last_health_check,
    }
}
