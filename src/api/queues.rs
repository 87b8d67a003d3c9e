//! Queue introspection API handlers.

use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use chrono::Utc;

use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::{JobStatus, QueueStatusResponse, QueueTierCounts, TierPriorityCounts};
use crate::scheduler::router;
use crate::scheduler::Tier;

/// Get the priority queue configuration.
#[utoipa::path(
    get,
    path = "/queues/priority-info",
    tag = "Queues",
    responses(
        (status = 200, description = "Priority queue configuration", body = crate::models::PriorityInfoResponse),
    )
)]
pub async fn get_priority_info() -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(router::priority_info()))
}

/// Get current queue status by priority level.
#[utoipa::path(
    get,
    path = "/queues/status",
    tag = "Queues",
    responses(
        (status = 200, description = "Queue status", body = QueueStatusResponse),
    )
)]
pub async fn get_queue_status(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let mut priority_breakdown = HashMap::new();
    let mut queue_summary: HashMap<String, QueueTierCounts> = Tier::all()
        .iter()
        .map(|t| (t.queue_name().to_string(), QueueTierCounts::default()))
        .collect();

    for priority in 1..=5 {
        let queue_name = Tier::route(priority).queue_name().to_string();
        let queued_jobs = pool.count_jobs(priority, JobStatus::Queued).await?;
        let running_jobs = pool.count_jobs(priority, JobStatus::Running).await?;

        if let Some(tier_counts) = queue_summary.get_mut(&queue_name) {
            tier_counts.queued_jobs += queued_jobs;
            tier_counts.running_jobs += running_jobs;
            tier_counts.total_active += queued_jobs + running_jobs;
        }

        priority_breakdown.insert(
            format!("priority_{}", priority),
            TierPriorityCounts {
                queue_name,
                queued_jobs,
                running_jobs,
                total_active: queued_jobs + running_jobs,
            },
        );
    }

    Ok(HttpResponse::Ok().json(QueueStatusResponse {
        queue_summary,
        priority_breakdown,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Configure queue routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/queues/priority-info").route(web::get().to(get_priority_info)))
        .service(web::resource("/queues/status").route(web::get().to(get_queue_status)));
}
