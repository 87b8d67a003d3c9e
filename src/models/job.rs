//! Job domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Job status enum.
///
/// Device assignment is tracked separately: a job holds a device reference
/// exactly while it is `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job accepted, waiting for a worker to pick it up.
    Queued,
    /// Job claimed into a batch and assigned a device.
    Running,
    /// Test execution finished successfully.
    Completed,
    /// Terminal failure: allocation exhaustion, execution error, or cancellation.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution target for a job. Devices carry the same enum as their type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Android emulator slot.
    Emulator,
    /// Physical device attached to the farm.
    Device,
    /// BrowserStack cloud device.
    Browserstack,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emulator => "emulator",
            Self::Device => "device",
            Self::Browserstack => "browserstack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "emulator" => Some(Self::Emulator),
            "device" => Some(Self::Device),
            "browserstack" => Some(Self::Browserstack),
            _ => None,
        }
    }

    /// Fixed app-installation cost for this target, in seconds. Paid once per
    /// batch; the amortized remainder is the batching win.
    pub fn install_duration_secs(&self) -> u64 {
        match self {
            Self::Emulator => 5,
            Self::Device => 10,
            Self::Browserstack => 15,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to submit a new test job.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmitJobRequest {
    /// Organization identifier.
    pub org_id: String,
    /// Application build identifier; jobs sharing it batch together.
    pub app_version_id: String,
    /// Path to the test file to execute.
    pub test_path: String,
    /// Priority 1-5, higher is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Execution target.
    #[serde(default = "default_target")]
    pub target: TargetType,
}

fn default_priority() -> i32 {
    1
}

fn default_target() -> TargetType {
    TargetType::Emulator
}

impl SubmitJobRequest {
    /// Validate the submission before any row is created.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=5).contains(&self.priority) {
            return Err(format!(
                "Priority must be between 1 and 5, got {}",
                self.priority
            ));
        }
        if self.org_id.trim().is_empty() {
            return Err("org_id must not be empty".to_string());
        }
        if self.app_version_id.trim().is_empty() {
            return Err("app_version_id must not be empty".to_string());
        }
        if self.test_path.trim().is_empty() {
            return Err("test_path must not be empty".to_string());
        }
        Ok(())
    }
}

/// Response after submitting a job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmitJobResponse {
    /// Job UUID (UUIDv7, time-ordered).
    pub job_id: Uuid,
    /// Initial status (always `queued` on acceptance).
    pub status: JobStatus,
    /// Queue tier the job was routed to.
    pub queue: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Detailed job response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobDetailResponse {
    /// Job UUID.
    pub id: Uuid,
    /// Organization identifier.
    pub org_id: String,
    /// Application build identifier.
    pub app_version_id: String,
    /// Test file path.
    pub test_path: String,
    /// Priority 1-5.
    pub priority: i32,
    /// Execution target.
    pub target: TargetType,
    /// Job status.
    pub status: JobStatus,
    /// Assigned device row id, present while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    /// Assigned device name for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_device_name: Option<String>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query parameters for listing jobs.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ListJobsQuery {
    /// Filter by application build identifier.
    #[serde(default)]
    pub app_version_id: Option<String>,
    /// Filter by status; supports a comma-separated list.
    #[serde(default)]
    pub status: Option<String>,
    /// Filter by priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Filter by target.
    #[serde(default)]
    pub target: Option<TargetType>,
    /// Filter by organization.
    #[serde(default)]
    pub org_id: Option<String>,
    /// Maximum results to return (default 50, max 500).
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Sort key: `created`, `priority`, or `status`.
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Sort order: `asc` or `desc`.
    #[serde(default = "default_order")]
    pub order: String,
}

fn default_limit() -> u64 {
    50
}

fn default_sort() -> String {
    "created".to_string()
}

fn default_order() -> String {
    "desc".to_string()
}

impl Default for ListJobsQuery {
    fn default() -> Self {
        Self {
            app_version_id: None,
            status: None,
            priority: None,
            target: None,
            org_id: None,
            limit: default_limit(),
            sort: default_sort(),
            order: default_order(),
        }
    }
}

/// Compact entry for the grouped-jobs view.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupedJobEntry {
    /// Job UUID.
    pub job_id: Uuid,
    /// Job status.
    pub status: JobStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One (app version, target) batch group with its status breakdown.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchGroup {
    /// Application build identifier.
    pub app_version_id: String,
    /// Execution target of the group.
    pub target: TargetType,
    /// Jobs in the group across all statuses.
    pub total_jobs: u64,
    /// Count per status string.
    pub status_breakdown: std::collections::HashMap<String, u64>,
    /// Earliest submission in the group.
    pub first_job: DateTime<Utc>,
    /// Latest submission in the group.
    pub last_job: DateTime<Utc>,
}

/// Batch efficiency summary across all groups.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchSummaryResponse {
    /// Number of distinct (app version, target) groups.
    pub total_batches: u64,
    /// Jobs across all groups.
    pub total_jobs: u64,
    /// Average group size.
    pub average_batch_size: f64,
    /// Installation seconds avoided if each group runs as one batch.
    pub potential_time_saved_seconds: u64,
    /// The groups themselves.
    pub batches: Vec<BatchGroup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: i32) -> SubmitJobRequest {
        SubmitJobRequest {
            org_id: "qa-team".to_string(),
            app_version_id: "v1.2.3".to_string(),
            test_path: "tests/login.spec.js".to_string(),
            priority,
            target: TargetType::Emulator,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("pending"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_target_round_trip() {
        for target in [
            TargetType::Emulator,
            TargetType::Device,
            TargetType::Browserstack,
        ] {
            assert_eq!(TargetType::parse(target.as_str()), Some(target));
        }
        assert_eq!(TargetType::parse("simulator"), None);
    }

    #[test]
    fn test_install_durations() {
        assert_eq!(TargetType::Emulator.install_duration_secs(), 5);
        assert_eq!(TargetType::Device.install_duration_secs(), 10);
        assert_eq!(TargetType::Browserstack.install_duration_secs(), 15);
    }

    #[test]
    fn test_submit_validation_accepts_valid_priorities() {
        for priority in 1..=5 {
            assert!(request(priority).validate().is_ok());
        }
    }

    #[test]
    fn test_submit_validation_rejects_out_of_range_priority() {
        assert!(request(0).validate().is_err());
        assert!(request(6).validate().is_err());
        assert!(request(-1).validate().is_err());
    }

    #[test]
    fn test_submit_validation_rejects_empty_fields() {
        let mut req = request(3);
        req.test_path = "  ".to_string();
        assert!(req.validate().is_err());

        let mut req = request(3);
        req.org_id = String::new();
        assert!(req.validate().is_err());
    }
}
