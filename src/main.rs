//! DevGrid Scheduler - Main entry point.
//!
//! Starts the Actix-web server, the scheduler worker pool, and the
//! re-dispatch sweep.

mod api;
mod config;
mod db;
mod entity;
mod error;
mod migration;
mod models;
mod queue;
mod runner;
mod scheduler;

use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, web};
use sea_orm_migration::MigratorTrait;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::db::DbPool;
use crate::scheduler::BatchCoordinator;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  DevGrid Scheduler");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        info!("Using development defaults for DATABASE_URL");
    }

    // Initialize database
    let pool = DbPool::new(&config)
        .await
        .expect("Failed to initialize database");
    info!("Database connection established");

    // Run migrations
    migration::Migrator::up(pool.connection(), None)
        .await
        .expect("Failed to run migrations");
    info!("Database migrations complete");

    // Build the tiered task transport and start the worker pool
    let (queues, receivers) = queue::job_queues();
    let coordinator = BatchCoordinator::new(
        pool.clone(),
        config.runner,
        Duration::from_secs(config.test_timeout_secs),
    );
    queue::spawn_workers(config.worker_count, receivers, coordinator);
    info!(
        "Scheduler started: {} workers, {} runner, {}s execution timeout",
        config.worker_count, config.runner, config.test_timeout_secs
    );

    // Re-dispatch sweep recovers lost deliveries and preempted jobs
    queue::start_requeue_sweep(pool.clone(), queues.clone(), config.requeue_sweep_secs);

    let bind_address = config.bind_address();
    let is_development = config.is_development();
    info!("Starting server at http://{}", bind_address);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = if is_development {
            // Permissive CORS for development
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::CONTENT_TYPE,
                ])
                .max_age(3600)
        } else {
            // Restrictive CORS for production (same-origin only)
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::CONTENT_TYPE,
                ])
                .max_age(3600)
        };

        App::new()
            .wrap(cors)
            // Shared state
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(queues.clone()))
            // API routes
            .service(
                web::scope("/api/v1")
                    .configure(api::configure_health_routes)
                    .configure(api::configure_job_routes)
                    .configure(api::configure_device_routes)
                    .configure(api::configure_queue_routes),
            )
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
            )
    })
    .bind(&bind_address)?
    .run()
    .await
}
