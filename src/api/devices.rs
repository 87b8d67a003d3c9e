//! Device fleet API handlers.

use actix_web::{HttpResponse, web};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    CreateDeviceRequest, CreateDeviceResponse, DeviceListResponse, DeviceStatus,
    HealthCheckResponse, PoolStatusResponse, RecommendationResponse, TargetType,
};
use crate::scheduler::allocator::{device_detail, AlwaysHealthy, DeviceAllocator};

/// Query parameters for recommendation requests.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecommendationQuery {
    /// Requesting priority (default 1).
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    1
}

/// Get all devices and their current status.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "Devices",
    responses(
        (status = 200, description = "Registered devices", body = DeviceListResponse),
    )
)]
pub async fn list_devices(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let devices = pool.list_devices().await?;

    Ok(HttpResponse::Ok().json(DeviceListResponse {
        devices: devices.iter().map(device_detail).collect(),
    }))
}

/// Register a new device in the pool.
#[utoipa::path(
    post,
    path = "/devices",
    tag = "Devices",
    request_body = CreateDeviceRequest,
    responses(
        (status = 200, description = "Device registered", body = CreateDeviceResponse),
        (status = 400, description = "Invalid request or duplicate device", body = crate::error::ErrorResponse),
    )
)]
pub async fn create_device(
    pool: web::Data<DbPool>,
    body: web::Json<CreateDeviceRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();

    req.validate().map_err(AppError::InvalidInput)?;

    if pool.get_device_by_name(&req.device_id).await?.is_some() {
        return Err(AppError::InvalidInput("Device ID already exists".to_string()));
    }

    let device = pool.insert_device(&req).await?;
    info!(
        "Registered device {} ({}, capacity {})",
        device.device_id, device.device_type, device.max_concurrent_jobs
    );

    Ok(HttpResponse::Ok().json(CreateDeviceResponse {
        id: device.id,
        device_id: device.device_id,
        status: DeviceStatus::Available,
        created_at: device.created_at,
    }))
}

/// Remove a device from the pool.
///
/// Refused while the device still has running jobs.
#[utoipa::path(
    delete,
    path = "/devices/{device_id}",
    tag = "Devices",
    params(
        ("device_id" = String, Path, description = "External device name")
    ),
    responses(
        (status = 200, description = "Device removed"),
        (status = 400, description = "Device has running jobs", body = crate::error::ErrorResponse),
        (status = 404, description = "Device not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn remove_device(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let device_name = path.into_inner();

    let device = pool
        .get_device_by_name(&device_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device {}", device_name)))?;

    if device.current_jobs > 0 {
        return Err(AppError::InvalidInput(
            "Cannot remove device with running jobs".to_string(),
        ));
    }

    pool.delete_device(device.id).await?;
    info!("Removed device {}", device_name);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Device {} removed successfully", device_name)
    })))
}

/// Get device pool status and utilization metrics.
#[utoipa::path(
    get,
    path = "/devices/status",
    tag = "Devices",
    responses(
        (status = 200, description = "Pool status", body = PoolStatusResponse),
    )
)]
pub async fn get_pool_status(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let allocator = DeviceAllocator::new(pool.get_ref());
    let status = allocator.pool_status().await?;

    Ok(HttpResponse::Ok().json(status))
}

/// Get allocation recommendations for a target type.
#[utoipa::path(
    get,
    path = "/devices/recommendations/{target_type}",
    tag = "Devices",
    params(
        ("target_type" = String, Path, description = "Target type: emulator, device, browserstack"),
        ("priority" = Option<i32>, Query, description = "Requesting priority (default 1)")
    ),
    responses(
        (status = 200, description = "Allocation recommendation", body = RecommendationResponse),
        (status = 400, description = "Unknown target type", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_recommendations(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    query: web::Query<RecommendationQuery>,
) -> AppResult<HttpResponse> {
    let target_str = path.into_inner();
    let target = TargetType::parse(&target_str)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown target type: {}", target_str)))?;

    let allocator = DeviceAllocator::new(pool.get_ref());
    let recommendation = allocator.recommend(target, query.priority).await?;

    Ok(HttpResponse::Ok().json(recommendation))
}

/// Perform a health check on all devices.
#[utoipa::path(
    post,
    path = "/devices/health-check",
    tag = "Devices",
    responses(
        (status = 200, description = "Health check results", body = HealthCheckResponse),
    )
)]
pub async fn perform_health_check(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let allocator = DeviceAllocator::new(pool.get_ref());
    let results = allocator.health_check(&AlwaysHealthy).await?;

    Ok(HttpResponse::Ok().json(results))
}

/// Configure device routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/devices")
            .route(web::get().to(list_devices))
            .route(web::post().to(create_device)),
    )
    .service(web::resource("/devices/status").route(web::get().to(get_pool_status)))
    .service(
        web::resource("/devices/recommendations/{target_type}")
            .route(web::get().to(get_recommendations)),
    )
    .service(web::resource("/devices/health-check").route(web::post().to(perform_health_check)))
    .service(web::resource("/devices/{device_id}").route(web::delete().to(remove_device)));
}
