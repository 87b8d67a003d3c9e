//! Queue introspection DTOs.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Priority queue configuration response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PriorityInfoResponse {
    /// Priority level -> queue name.
    pub priority_mapping: HashMap<String, String>,
    /// Drain order, highest first.
    pub queue_order: Vec<String>,
    /// Queue name -> human description.
    pub description: HashMap<String, String>,
}

/// Queued/running counts for one priority level.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TierPriorityCounts {
    /// Queue the priority routes to.
    pub queue_name: String,
    pub queued_jobs: u64,
    pub running_jobs: u64,
    pub total_active: u64,
}

/// Aggregated counts for one queue tier.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct QueueTierCounts {
    pub queued_jobs: u64,
    pub running_jobs: u64,
    pub total_active: u64,
}

/// Queue status response with per-tier and per-priority breakdowns.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueStatusResponse {
    /// Counts keyed by queue name.
    pub queue_summary: HashMap<String, QueueTierCounts>,
    /// Counts keyed by `priority_N`.
    pub priority_breakdown: HashMap<String, TierPriorityCounts>,
    /// Snapshot timestamp (RFC 3339).
    pub timestamp: String,
}
