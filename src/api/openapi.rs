//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "DevGrid Scheduler",
        version = "0.3.0",
        description = "Priority-based scheduler routing test jobs onto a shared device pool with cross-job batching and preemption"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::health,
        api::health::ready,
        // Job endpoints
        api::jobs::submit_job,
        api::jobs::get_job,
        api::jobs::list_jobs,
        api::jobs::cancel_job,
        api::jobs::get_grouped_jobs,
        api::jobs::get_batch_summary,
        // Device endpoints
        api::devices::list_devices,
        api::devices::create_device,
        api::devices::remove_device,
        api::devices::get_pool_status,
        api::devices::get_recommendations,
        api::devices::perform_health_check,
        // Queue endpoints
        api::queues::get_priority_info,
        api::queues::get_queue_status,
    ),
    components(
        schemas(
            // Common
            error::ErrorResponse,
            // Health
            api::health::HealthResponse,
            api::health::ReadyResponse,
            // Jobs
            models::JobStatus,
            models::TargetType,
            models::SubmitJobRequest,
            models::SubmitJobResponse,
            models::JobDetailResponse,
            models::ListJobsQuery,
            models::GroupedJobEntry,
            models::BatchGroup,
            models::BatchSummaryResponse,
            // Devices
            models::DeviceStatus,
            models::CreateDeviceRequest,
            models::CreateDeviceResponse,
            models::DeviceDetail,
            models::DeviceListResponse,
            models::DeviceTypeStats,
            models::PriorityAllocationStats,
            models::PoolStatusResponse,
            models::Recommendation,
            models::RecommendationResponse,
            models::HealthCheckDetail,
            models::HealthCheckResponse,
            api::devices::RecommendationQuery,
            // Queues
            models::PriorityInfoResponse,
            models::TierPriorityCounts,
            models::QueueTierCounts,
            models::QueueStatusResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Jobs", description = "Job submission, status, and batching"),
        (name = "Devices", description = "Device fleet management and allocation views"),
        (name = "Queues", description = "Priority queue introspection")
    )
)]
pub struct ApiDoc;
