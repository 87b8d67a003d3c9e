//! Shared helpers for the integration suites: an in-memory database with
//! migrations applied, plus fixture builders for devices, jobs, and test
//! files.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::Database;
use sea_orm_migration::MigratorTrait;

use devgrid_lib::db::DbPool;
use devgrid_lib::entity::{device, job};
use devgrid_lib::migration::Migrator;
use devgrid_lib::models::{CreateDeviceRequest, TargetType};
use devgrid_lib::runner::{MockRunner, TestRunner};
use devgrid_lib::scheduler::BatchCoordinator;

/// Fresh in-memory database with the schema applied.
pub async fn test_pool() -> DbPool {
    let conn = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    Migrator::up(&conn, None)
        .await
        .expect("Failed to run migrations");
    DbPool::from_connection(conn)
}

/// Register a device with the given capacity.
pub async fn add_device(
    pool: &DbPool,
    name: &str,
    device_type: TargetType,
    max_concurrent_jobs: i32,
) -> device::Model {
    pool.insert_device(&CreateDeviceRequest {
        device_id: name.to_string(),
        device_type,
        max_concurrent_jobs,
        location: None,
        capabilities: None,
    })
    .await
    .expect("Failed to insert device")
}

/// Submit a job in `queued` state.
pub async fn add_job(
    pool: &DbPool,
    app_version_id: &str,
    target: TargetType,
    priority: i32,
    test_path: &str,
) -> job::Model {
    pool.insert_job("test-org", app_version_id, test_path, priority, target)
        .await
        .expect("Failed to insert job")
}

/// Put a job into `running` state on a device, reserving one occupancy slot -
/// the same sequence the allocator and coordinator perform.
pub async fn start_job_on_device(pool: &DbPool, job: &job::Model, device: &device::Model) {
    assert!(
        pool.try_reserve_slot(device.id).await.unwrap(),
        "device slot reservation failed"
    );
    assert!(
        pool.claim_job(job.id, device.id, &device.device_id)
            .await
            .unwrap(),
        "job claim failed"
    );
}

/// Coordinator wired to the instant mock runner.
pub fn instant_coordinator(pool: &DbPool) -> BatchCoordinator {
    BatchCoordinator::with_runner_factory(
        pool.clone(),
        Arc::new(|target| Arc::new(MockRunner::instant(target)) as Arc<dyn TestRunner>),
        Duration::from_secs(30),
    )
}

/// Write a valid test file into the directory and return its path.
pub fn write_test_file(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"describe('suite', () => { it('works', () => {}); });")
        .unwrap();
    path.to_string_lossy().to_string()
}
