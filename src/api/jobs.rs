//! Job API handlers: submission, status, listing, cancellation, and batch
//! introspection.

use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use tracing::info;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entity::job;
use crate::error::{AppError, AppResult};
use crate::models::{
    BatchGroup, BatchSummaryResponse, GroupedJobEntry, JobDetailResponse, JobStatus,
    ListJobsQuery, SubmitJobRequest, SubmitJobResponse, TargetType,
};
use crate::queue::JobQueues;
use crate::scheduler::Tier;

/// Map a job row onto the detail response.
fn job_detail(job: &job::Model) -> JobDetailResponse {
    JobDetailResponse {
        id: job.id,
        org_id: job.org_id.clone(),
        app_version_id: job.app_version_id.clone(),
        test_path: job.test_path.clone(),
        priority: job.priority,
        target: TargetType::parse(&job.target).unwrap_or(TargetType::Emulator),
        status: JobStatus::parse(&job.status).unwrap_or(JobStatus::Failed),
        device_id: job.device_id,
        assigned_device_name: job.assigned_device_name.clone(),
        error_message: job.error_message.clone(),
        created_at: job.created_at,
        updated_at: job.updated_at,
    }
}

/// Submit a new test job.
///
/// Validates the request, creates the job in `queued` state, and enqueues one
/// task invocation routed by priority. Always returns the job id immediately;
/// later state is observed by polling.
#[utoipa::path(
    post,
    path = "/jobs/submit",
    tag = "Jobs",
    request_body = SubmitJobRequest,
    responses(
        (status = 200, description = "Job accepted", body = SubmitJobResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
    )
)]
pub async fn submit_job(
    pool: web::Data<DbPool>,
    queues: web::Data<JobQueues>,
    body: web::Json<SubmitJobRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();

    req.validate().map_err(AppError::InvalidInput)?;

    let job = pool
        .insert_job(
            &req.org_id,
            &req.app_version_id,
            &req.test_path,
            req.priority,
            req.target,
        )
        .await?;

    info!(
        "Created job {} with priority {}, status {}",
        job.id, job.priority, job.status
    );

    let tier = Tier::route(req.priority);
    if let Err(e) = queues.enqueue(job.id, req.priority) {
        // The job row exists but can never be delivered; fail it now.
        pool.fail_queued_job(job.id, "Failed to enqueue job for processing")
            .await?;
        return Err(e);
    }

    info!(
        "Queued job {} in {} queue (priority {})",
        job.id,
        tier.queue_name(),
        req.priority
    );

    Ok(HttpResponse::Ok().json(SubmitJobResponse {
        job_id: job.id,
        status: JobStatus::Queued,
        queue: tier.queue_name().to_string(),
        created_at: job.created_at,
    }))
}

/// Get the status of a job.
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    tag = "Jobs",
    params(
        ("job_id" = Uuid, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobDetailResponse),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_job(pool: web::Data<DbPool>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();

    let job = pool
        .get_job_by_id(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;

    Ok(HttpResponse::Ok().json(job_detail(&job)))
}

/// List jobs with optional filtering and sorting.
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "Jobs",
    params(
        ("app_version_id" = Option<String>, Query, description = "Filter by app version"),
        ("status" = Option<String>, Query, description = "Filter by status (comma-separated list allowed)"),
        ("priority" = Option<i32>, Query, description = "Filter by priority"),
        ("target" = Option<String>, Query, description = "Filter by target"),
        ("org_id" = Option<String>, Query, description = "Filter by organization"),
        ("limit" = Option<u64>, Query, description = "Results limit (default 50, max 500)"),
        ("sort" = Option<String>, Query, description = "Sort key: created, priority, status"),
        ("order" = Option<String>, Query, description = "Sort order: asc or desc")
    ),
    responses(
        (status = 200, description = "List of jobs", body = [JobDetailResponse]),
    )
)]
pub async fn list_jobs(
    pool: web::Data<DbPool>,
    query: web::Query<ListJobsQuery>,
) -> AppResult<HttpResponse> {
    let jobs = pool.query_jobs(&query.into_inner()).await?;
    let response: Vec<JobDetailResponse> = jobs.iter().map(job_detail).collect();

    Ok(HttpResponse::Ok().json(response))
}

/// Cancel a queued or running job.
#[utoipa::path(
    delete,
    path = "/jobs/{job_id}",
    tag = "Jobs",
    params(
        ("job_id" = Uuid, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job cancelled"),
        (status = 400, description = "Job already terminal", body = crate::error::ErrorResponse),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn cancel_job(pool: web::Data<DbPool>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let job_id = path.into_inner();

    let job = pool
        .get_job_by_id(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;

    let original_status = JobStatus::parse(&job.status).unwrap_or(JobStatus::Failed);
    if original_status.is_terminal() {
        return Err(AppError::InvalidInput(format!(
            "Cannot cancel job with status: {}",
            original_status
        )));
    }

    if !pool.cancel_job(job_id, "Cancelled by user").await? {
        // Reached a terminal state between the read and the write.
        return Err(AppError::InvalidInput(
            "Job reached a terminal state before cancellation".to_string(),
        ));
    }

    info!("Job {} cancelled (was {})", job_id, original_status);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "job_id": job_id,
        "message": format!("Job cancelled successfully (was {})", original_status),
        "previous_status": original_status,
        "new_status": JobStatus::Failed,
    })))
}

/// Get all jobs for a specific app version.
#[utoipa::path(
    get,
    path = "/jobs/group/{app_version_id}",
    tag = "Jobs",
    params(
        ("app_version_id" = String, Path, description = "Application build identifier")
    ),
    responses(
        (status = 200, description = "Jobs in the group", body = [GroupedJobEntry]),
    )
)]
pub async fn get_grouped_jobs(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let app_version_id = path.into_inner();
    let jobs = pool.get_jobs_by_app_version(&app_version_id).await?;

    let response: Vec<GroupedJobEntry> = jobs
        .iter()
        .map(|j| GroupedJobEntry {
            job_id: j.id,
            status: JobStatus::parse(&j.status).unwrap_or(JobStatus::Failed),
            created_at: j.created_at,
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

/// Get the batch processing summary showing grouping efficiency.
#[utoipa::path(
    get,
    path = "/batches/summary",
    tag = "Jobs",
    responses(
        (status = 200, description = "Batch efficiency summary", body = BatchSummaryResponse),
    )
)]
pub async fn get_batch_summary(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let jobs = pool.get_all_jobs().await?;

    let mut groups: HashMap<(String, String), BatchGroup> = HashMap::new();

    for job in &jobs {
        let key = (job.app_version_id.clone(), job.target.clone());
        let target = TargetType::parse(&job.target).unwrap_or(TargetType::Emulator);

        let group = groups.entry(key).or_insert_with(|| BatchGroup {
            app_version_id: job.app_version_id.clone(),
            target,
            total_jobs: 0,
            status_breakdown: HashMap::new(),
            first_job: job.created_at,
            last_job: job.created_at,
        });

        group.total_jobs += 1;
        *group.status_breakdown.entry(job.status.clone()).or_insert(0) += 1;
        if job.created_at < group.first_job {
            group.first_job = job.created_at;
        }
        if job.created_at > group.last_job {
            group.last_job = job.created_at;
        }
    }

    let batches: Vec<BatchGroup> = groups.into_values().collect();
    let total_batches = batches.len() as u64;
    let total_jobs: u64 = batches.iter().map(|b| b.total_jobs).sum();
    let potential_time_saved_seconds: u64 = batches
        .iter()
        .map(|b| b.total_jobs.saturating_sub(1) * b.target.install_duration_secs())
        .sum();

    let average_batch_size = if total_batches > 0 {
        (total_jobs as f64 / total_batches as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(HttpResponse::Ok().json(BatchSummaryResponse {
        total_batches,
        total_jobs,
        average_batch_size,
        potential_time_saved_seconds,
        batches,
    }))
}

/// Configure job routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/jobs/submit").route(web::post().to(submit_job)))
        .service(
            web::resource("/jobs/group/{app_version_id}").route(web::get().to(get_grouped_jobs)),
        )
        .service(
            web::resource("/jobs/{job_id}")
                .route(web::get().to(get_job))
                .route(web::delete().to(cancel_job)),
        )
        .service(web::resource("/jobs").route(web::get().to(list_jobs)))
        .service(web::resource("/batches/summary").route(web::get().to(get_batch_summary)));
}
