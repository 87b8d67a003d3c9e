//! API endpoint modules.

pub mod devices;
pub mod health;
pub mod jobs;
pub mod openapi;
pub mod queues;

pub use devices::configure_routes as configure_device_routes;
pub use health::configure_health_routes;
pub use jobs::configure_routes as configure_job_routes;
pub use openapi::ApiDoc;
pub use queues::configure_routes as configure_queue_routes;
