//! Domain models and DTOs.

pub mod device;
pub mod job;
pub mod queue;

pub use device::{
    CreateDeviceRequest, CreateDeviceResponse, DeviceDetail, DeviceListResponse, DeviceStatus,
    DeviceTypeStats, HealthCheckDetail, HealthCheckResponse, PoolStatusResponse,
    PriorityAllocationStats, Recommendation, RecommendationResponse,
};
pub use job::{
    BatchGroup, BatchSummaryResponse, GroupedJobEntry, JobDetailResponse, JobStatus,
    ListJobsQuery, SubmitJobRequest, SubmitJobResponse, TargetType,
};
pub use queue::{PriorityInfoResponse, QueueStatusResponse, QueueTierCounts, TierPriorityCounts};
