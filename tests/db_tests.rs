//! Integration tests for the conditional state transitions in the db layer:
//! claim compare-and-swap, terminal writes racing cancellation, and the
//! preemption bulk updates.

mod common;

use chrono::Utc;

use devgrid_lib::models::{JobStatus, ListJobsQuery, TargetType};

use common::{add_device, add_job, start_job_on_device, test_pool};

#[tokio::test]
async fn claim_is_compare_and_swap() {
    let pool = test_pool().await;
    let device = add_device(&pool, "emulator-1", TargetType::Emulator, 2).await;
    let job = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;

    // First claim wins, second loses: the row moves exactly once even when
    // two workers sweep overlapping cohorts.
    assert!(pool.claim_job(job.id, device.id, "emulator-1").await.unwrap());
    assert!(!pool.claim_job(job.id, device.id, "emulator-1").await.unwrap());

    let job = pool.get_job_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running.as_str());
    assert_eq!(job.assigned_device_name.as_deref(), Some("emulator-1"));
}

#[tokio::test]
async fn cancellation_wins_over_terminal_write() {
    let pool = test_pool().await;
    let device = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let job = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;
    start_job_on_device(&pool, &job, &device).await;

    // External cancellation lands while the batch is mid-flight.
    assert!(pool.cancel_job(job.id, "Cancelled by user").await.unwrap());

    // The coordinator's terminal write loses the race and must not
    // overwrite the cancellation.
    assert!(
        !pool
            .finish_running_job(job.id, JobStatus::Completed, None)
            .await
            .unwrap()
    );

    let job = pool.get_job_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert_eq!(job.error_message.as_deref(), Some("Cancelled by user"));
}

#[tokio::test]
async fn cancel_only_applies_to_active_jobs() {
    let pool = test_pool().await;
    let job = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;

    assert!(pool.cancel_job(job.id, "Cancelled by user").await.unwrap());
    // Already terminal: the second cancel is rejected.
    assert!(!pool.cancel_job(job.id, "Cancelled again").await.unwrap());
}

#[tokio::test]
async fn fail_queued_job_skips_claimed_rows() {
    let pool = test_pool().await;
    let device = add_device(&pool, "emulator-1", TargetType::Emulator, 1).await;
    let job = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;

    start_job_on_device(&pool, &job, &device).await;

    // The job left the queue; the queued->failed shortcut no longer applies.
    assert!(!pool.fail_queued_job(job.id, "no devices").await.unwrap());

    let job = pool.get_job_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running.as_str());
}

#[tokio::test]
async fn requeue_preempted_jobs_targets_only_significantly_lower_priority() {
    let pool = test_pool().await;
    let device = add_device(&pool, "emulator-1", TargetType::Emulator, 3).await;

    let p1 = add_job(&pool, "v1", TargetType::Emulator, 1, "a.spec.js").await;
    let p2 = add_job(&pool, "v1", TargetType::Emulator, 2, "b.spec.js").await;
    let p3 = add_job(&pool, "v1", TargetType::Emulator, 3, "c.spec.js").await;
    for job in [&p1, &p2, &p3] {
        start_job_on_device(&pool, job, &device).await;
    }

    // A priority-4 request preempts strictly below priority 3.
    assert_eq!(pool.count_preemptible_jobs(device.id, 3).await.unwrap(), 2);
    let requeued = pool.requeue_preempted_jobs(device.id, 3).await.unwrap();
    assert_eq!(requeued, 2);

    assert_eq!(
        pool.get_job_by_id(p1.id).await.unwrap().unwrap().status,
        JobStatus::Queued.as_str()
    );
    assert_eq!(
        pool.get_job_by_id(p2.id).await.unwrap().unwrap().status,
        JobStatus::Queued.as_str()
    );
    assert_eq!(
        pool.get_job_by_id(p3.id).await.unwrap().unwrap().status,
        JobStatus::Running.as_str()
    );
}

#[tokio::test]
async fn finish_running_job_forces_terminal_failure() {
    let pool = test_pool().await;
    let device = add_device(&pool, "emulator-1", TargetType::Emulator, 2).await;
    let a = add_job(&pool, "v1", TargetType::Emulator, 3, "a.spec.js").await;
    let b = add_job(&pool, "v1", TargetType::Emulator, 3, "b.spec.js").await;
    start_job_on_device(&pool, &a, &device).await;
    start_job_on_device(&pool, &b, &device).await;

    // Batch-error reconciliation: every claimed member is forced to failed
    // and holds no device reference afterwards.
    for id in [a.id, b.id] {
        assert!(
            pool.finish_running_job(id, JobStatus::Failed, Some("Batch processing error"))
                .await
                .unwrap()
        );
        let job = pool.get_job_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed.as_str());
        assert!(job.device_id.is_none());
        assert_eq!(
            job.error_message.as_deref(),
            Some("Batch processing error")
        );
    }
}

#[tokio::test]
async fn query_jobs_filters_and_sorts() {
    let pool = test_pool().await;
    add_job(&pool, "v1", TargetType::Emulator, 1, "a.spec.js").await;
    add_job(&pool, "v1", TargetType::Device, 5, "b.spec.js").await;
    add_job(&pool, "v2", TargetType::Emulator, 3, "c.spec.js").await;

    let by_version = pool
        .query_jobs(&ListJobsQuery {
            app_version_id: Some("v1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_version.len(), 2);

    let by_priority_desc = pool
        .query_jobs(&ListJobsQuery {
            sort: "priority".to_string(),
            order: "desc".to_string(),
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_priority_desc[0].priority, 5);
    assert_eq!(by_priority_desc[2].priority, 1);

    let by_status_list = pool
        .query_jobs(&ListJobsQuery {
            status: Some("queued,running".to_string()),
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_status_list.len(), 3);
}

#[tokio::test]
async fn stale_queued_jobs_are_found_for_redispatch() {
    let pool = test_pool().await;
    let job = add_job(&pool, "v1", TargetType::Emulator, 2, "a.spec.js").await;

    // Nothing is stale against a cutoff in the past.
    let past = Utc::now() - chrono::Duration::seconds(60);
    assert!(pool.find_stale_queued_jobs(past, 100).await.unwrap().is_empty());

    // Against a future cutoff the queued job qualifies.
    let future = Utc::now() + chrono::Duration::seconds(60);
    let stale = pool.find_stale_queued_jobs(future, 100).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, job.id);
}

#[tokio::test]
async fn count_jobs_by_priority_and_status() {
    let pool = test_pool().await;
    add_job(&pool, "v1", TargetType::Emulator, 4, "a.spec.js").await;
    add_job(&pool, "v1", TargetType::Emulator, 4, "b.spec.js").await;
    add_job(&pool, "v1", TargetType::Emulator, 2, "c.spec.js").await;

    assert_eq!(pool.count_jobs(4, JobStatus::Queued).await.unwrap(), 2);
    assert_eq!(pool.count_jobs(2, JobStatus::Queued).await.unwrap(), 1);
    assert_eq!(pool.count_jobs(4, JobStatus::Running).await.unwrap(), 0);
}
