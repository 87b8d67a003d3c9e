//! Integration tests for the device allocator: selection policy, capacity
//! invariants, preemption, release, recommendations, and health checks.

mod common;

use async_trait::async_trait;

use devgrid_lib::entity::device;
use devgrid_lib::models::{DeviceStatus, JobStatus, Recommendation, TargetType};
use devgrid_lib::scheduler::{AlwaysHealthy, DeviceAllocator, DeviceProbe};

use common::{add_device, add_job, start_job_on_device, test_pool};

#[tokio::test]
async fn normal_priority_picks_least_loaded_device() {
    let pool = test_pool().await;
    let idle = add_device(&pool, "emulator-idle", TargetType::Emulator, 4).await;
    let loaded = add_device(&pool, "emulator-loaded", TargetType::Emulator, 4).await;

    // Put two units of load on the second device.
    assert!(pool.try_reserve_slot(loaded.id).await.unwrap());
    assert!(pool.try_reserve_slot(loaded.id).await.unwrap());

    let allocator = DeviceAllocator::new(&pool);
    let allocated = allocator.allocate(TargetType::Emulator, 3).await.unwrap();

    assert_eq!(allocated.id, idle.id);
    assert_eq!(allocated.current_jobs, 1);
}

#[tokio::test]
async fn low_priority_packs_onto_busiest_available_device() {
    let pool = test_pool().await;
    let idle = add_device(&pool, "emulator-idle", TargetType::Emulator, 4).await;
    let loaded = add_device(&pool, "emulator-loaded", TargetType::Emulator, 4).await;

    assert!(pool.try_reserve_slot(loaded.id).await.unwrap());
    assert!(pool.try_reserve_slot(loaded.id).await.unwrap());

    let allocator = DeviceAllocator::new(&pool);
    let allocated = allocator.allocate(TargetType::Emulator, 1).await.unwrap();

    assert_eq!(allocated.id, loaded.id);
    assert_eq!(allocated.current_jobs, 3);

    // The idle device kept its capacity free for future arrivals.
    let idle = pool.get_device_by_id(idle.id).await.unwrap().unwrap();
    assert_eq!(idle.current_jobs, 0);
}

#[tokio::test]
async fn allocation_never_oversubscribes_capacity() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 2).await;

    let allocator = DeviceAllocator::new(&pool);
    assert!(allocator.allocate(TargetType::Emulator, 3).await.is_some());
    assert!(allocator.allocate(TargetType::Emulator, 3).await.is_some());

    // Third request finds no capacity and (priority < 4) no preemption.
    assert!(allocator.allocate(TargetType::Emulator, 3).await.is_none());

    let dev = pool.get_device_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(dev.current_jobs, 2);
    assert_eq!(dev.max_concurrent_jobs, 2);
    assert_eq!(dev.status, "busy");
}

#[tokio::test]
async fn allocation_ignores_other_device_types() {
    let pool = test_pool().await;
    add_device(&pool, "device-1", TargetType::Device, 1).await;

    let allocator = DeviceAllocator::new(&pool);
    assert!(allocator.allocate(TargetType::Emulator, 3).await.is_none());
}

#[tokio::test]
async fn preemption_frees_device_from_low_priority_job() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let low_job = add_job(&pool, "v1", TargetType::Emulator, 1, "a.spec.js").await;
    start_job_on_device(&pool, &low_job, &dev).await;

    let allocator = DeviceAllocator::new(&pool);
    let allocated = allocator.allocate(TargetType::Emulator, 5).await;

    // The busy device was freed and handed to the priority-5 request.
    let allocated = allocated.expect("priority 5 should preempt");
    assert_eq!(allocated.id, dev.id);

    // The preempted job re-entered scheduling with no device reference.
    let low_job = pool.get_job_by_id(low_job.id).await.unwrap().unwrap();
    assert_eq!(low_job.status, JobStatus::Queued.as_str());
    assert!(low_job.device_id.is_none());
    assert!(low_job.assigned_device_name.is_none());

    // Occupancy reflects the incoming job's unit of load.
    let dev = pool.get_device_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(dev.current_jobs, 1);
}

#[tokio::test]
async fn preemption_skips_adjacent_priority_jobs() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let mid_job = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;
    start_job_on_device(&pool, &mid_job, &dev).await;

    // Priority 4 may only preempt jobs below priority 3; a priority-3 job is
    // too close to evict.
    let allocator = DeviceAllocator::new(&pool);
    assert!(allocator.allocate(TargetType::Emulator, 4).await.is_none());

    let mid_job = pool.get_job_by_id(mid_job.id).await.unwrap().unwrap();
    assert_eq!(mid_job.status, JobStatus::Running.as_str());
}

#[tokio::test]
async fn no_preemption_below_priority_four() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let low_job = add_job(&pool, "v1", TargetType::Emulator, 1, "a.spec.js").await;
    start_job_on_device(&pool, &low_job, &dev).await;

    let allocator = DeviceAllocator::new(&pool);
    assert!(allocator.allocate(TargetType::Emulator, 3).await.is_none());

    let low_job = pool.get_job_by_id(low_job.id).await.unwrap().unwrap();
    assert_eq!(low_job.status, JobStatus::Running.as_str());
}

#[tokio::test]
async fn release_restores_availability_and_floors_at_zero() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;

    let allocator = DeviceAllocator::new(&pool);
    allocator.allocate(TargetType::Emulator, 3).await.unwrap();

    let busy = pool.get_device_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(busy.status, "busy");

    allocator.release(dev.id).await;
    let released = pool.get_device_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(released.status, "available");
    assert_eq!(released.current_jobs, 0);

    // A second release stays floored at zero.
    allocator.release(dev.id).await;
    let released = pool.get_device_by_id(dev.id).await.unwrap().unwrap();
    assert_eq!(released.current_jobs, 0);
}

#[tokio::test]
async fn release_of_unknown_device_is_a_no_op() {
    let pool = test_pool().await;
    let allocator = DeviceAllocator::new(&pool);

    // Logs a warning and returns without error.
    allocator.release(uuid::Uuid::new_v4()).await;
}

#[tokio::test]
async fn recommend_immediate_when_capacity_exists() {
    let pool = test_pool().await;
    add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;

    let allocator = DeviceAllocator::new(&pool);
    let rec = allocator.recommend(TargetType::Emulator, 3).await.unwrap();

    assert_eq!(rec.recommendation, Recommendation::ImmediateAllocation);
    assert_eq!(rec.device_id.as_deref(), Some("emulator-1"));
    assert_eq!(rec.estimated_wait_time, Some(0));
}

#[tokio::test]
async fn recommend_preemption_for_high_priority() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let low_job = add_job(&pool, "v1", TargetType::Emulator, 1, "a.spec.js").await;
    start_job_on_device(&pool, &low_job, &dev).await;

    let allocator = DeviceAllocator::new(&pool);
    let rec = allocator.recommend(TargetType::Emulator, 5).await.unwrap();

    assert_eq!(rec.recommendation, Recommendation::PreemptionAvailable);
    assert!(rec.priority_advantage);
}

#[tokio::test]
async fn recommend_wait_estimates_scale_with_priority() {
    let pool = test_pool().await;
    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let running = add_job(&pool, "v1", TargetType::Emulator, 4, "a.spec.js").await;
    start_job_on_device(&pool, &running, &dev).await;

    let allocator = DeviceAllocator::new(&pool);

    // One running job x 30s average duration.
    let normal = allocator.recommend(TargetType::Emulator, 3).await.unwrap();
    assert_eq!(normal.recommendation, Recommendation::QueueAndWait);
    assert_eq!(normal.estimated_wait_time, Some(30));

    // The priority-4 occupant can't be preempted by priority 5 (adjacent
    // tier), so the estimate applies with the high-priority discount.
    let high = allocator.recommend(TargetType::Emulator, 5).await.unwrap();
    assert_eq!(high.recommendation, Recommendation::QueueAndWait);
    assert_eq!(high.estimated_wait_time, Some(15));

    let low = allocator.recommend(TargetType::Emulator, 1).await.unwrap();
    assert_eq!(low.recommendation, Recommendation::QueueAndWait);
    assert_eq!(low.estimated_wait_time, Some(45));
}

#[tokio::test]
async fn recommend_reports_unconfigured_and_offline_pools() {
    let pool = test_pool().await;

    let allocator = DeviceAllocator::new(&pool);
    let rec = allocator.recommend(TargetType::Emulator, 3).await.unwrap();
    assert_eq!(rec.recommendation, Recommendation::NoDevicesAvailable);

    let dev = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    pool.record_health_check(dev.id, Some(DeviceStatus::Offline))
        .await
        .unwrap();

    let rec = allocator.recommend(TargetType::Emulator, 3).await.unwrap();
    assert_eq!(rec.recommendation, Recommendation::DevicesOffline);
}

struct NeverHealthy;

#[async_trait]
impl DeviceProbe for NeverHealthy {
    async fn check(&self, _device: &device::Model) -> bool {
        false
    }
}

#[tokio::test]
async fn health_check_reconciles_device_status() {
    let pool = test_pool().await;
    let offline = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    pool.record_health_check(offline.id, Some(DeviceStatus::Offline))
        .await
        .unwrap();

    let allocator = DeviceAllocator::new(&pool);

    // Healthy probe brings the offline device back into rotation.
    let report = allocator.health_check(&AlwaysHealthy).await.unwrap();
    assert_eq!(report.total_checked, 1);
    assert_eq!(report.healthy, 1);
    let dev = pool.get_device_by_id(offline.id).await.unwrap().unwrap();
    assert_eq!(dev.status, "available");

    // Unhealthy probe takes it offline again.
    let report = allocator.health_check(&NeverHealthy).await.unwrap();
    assert_eq!(report.unhealthy, 1);
    let dev = pool.get_device_by_id(offline.id).await.unwrap().unwrap();
    assert_eq!(dev.status, "offline");
}

#[tokio::test]
async fn pool_status_aggregates_fleet_state() {
    let pool = test_pool().await;
    let emu = add_device(&pool, "emulator-1", TargetType::Emulator, 2).await;
    add_device(&pool, "device-1", TargetType::Device, 1).await;
    assert!(pool.try_reserve_slot(emu.id).await.unwrap());

    let allocator = DeviceAllocator::new(&pool);
    let status = allocator.pool_status().await.unwrap();

    assert_eq!(status.total_devices, 2);
    assert_eq!(status.available_devices, 2);
    assert_eq!(status.by_type["emulator"].total, 1);
    assert_eq!(status.by_type["emulator"].avg_utilization, 50.0);
    assert_eq!(status.by_type["device"].avg_utilization, 0.0);
    assert_eq!(status.priority_allocation.len(), 5);
}
