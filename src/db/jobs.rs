//! Database queries for jobs.
//!
//! Every state transition here is a single conditional UPDATE so concurrent
//! workers can race safely: the row moves exactly once and the caller learns
//! whether it won from the affected-row count.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::job::{self, ActiveModel, Entity as Job};
use crate::error::{AppError, AppResult};
use crate::models::{JobStatus, ListJobsQuery, TargetType};

use super::DbPool;

impl DbPool {
    /// Insert a new job in `queued` state.
    pub async fn insert_job(
        &self,
        org_id: &str,
        app_version_id: &str,
        test_path: &str,
        priority: i32,
        target: TargetType,
    ) -> AppResult<job::Model> {
        let now = Utc::now();

        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            org_id: Set(org_id.to_string()),
            app_version_id: Set(app_version_id.to_string()),
            test_path: Set(test_path.to_string()),
            priority: Set(priority),
            target: Set(target.as_str().to_string()),
            status: Set(JobStatus::Queued.as_str().to_string()),
            device_id: Set(None),
            assigned_device_name: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert job: {}", e)))?;

        Ok(result)
    }

    /// Get a job by ID.
    pub async fn get_job_by_id(&self, id: Uuid) -> AppResult<Option<job::Model>> {
        let result = Job::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get job: {}", e)))?;

        Ok(result)
    }

    /// Find all queued jobs sharing an app build and target - the claimable
    /// cohort for a batch.
    pub async fn find_queued_cohort(
        &self,
        app_version_id: &str,
        target: TargetType,
    ) -> AppResult<Vec<job::Model>> {
        let result = Job::find()
            .filter(job::Column::AppVersionId.eq(app_version_id))
            .filter(job::Column::Target.eq(target.as_str()))
            .filter(job::Column::Status.eq(JobStatus::Queued.as_str()))
            .order_by_asc(job::Column::Id) // UUIDv7 is time-ordered
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find queued cohort: {}", e)))?;

        Ok(result)
    }

    /// Claim one queued job into a running batch. Compare-and-swap on status:
    /// returns false when a competing worker claimed the row first.
    pub async fn claim_job(
        &self,
        id: Uuid,
        device_row_id: Uuid,
        device_name: &str,
    ) -> AppResult<bool> {
        let result = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(job::Column::DeviceId, Expr::value(Some(device_row_id)))
            .col_expr(
                job::Column::AssignedDeviceName,
                Expr::value(Some(device_name.to_string())),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Queued.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to claim job: {}", e)))?;

        Ok(result.rows_affected == 1)
    }

    /// Write a terminal status for a running job. Conditional on the job
    /// still being `running`, so an out-of-band cancellation is never
    /// overwritten. Clears the device reference; the denormalized device
    /// name stays for display.
    pub async fn finish_running_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<bool> {
        let result = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(status.as_str()))
            .col_expr(job::Column::DeviceId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job::Column::ErrorMessage,
                Expr::value(error_message.map(|e| e.to_string())),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Running.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to finish job: {}", e)))?;

        Ok(result.rows_affected == 1)
    }

    /// Fail a job that never left the queue (allocation exhaustion).
    pub async fn fail_queued_job(&self, id: Uuid, error_message: &str) -> AppResult<bool> {
        let result = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(
                job::Column::ErrorMessage,
                Expr::value(Some(error_message.to_string())),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Queued.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to fail queued job: {}", e)))?;

        Ok(result.rows_affected == 1)
    }

    /// Cancel a job from `queued` or `running`. Returns false when the job
    /// already reached a terminal state.
    pub async fn cancel_job(&self, id: Uuid, reason: &str) -> AppResult<bool> {
        let result = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(job::Column::DeviceId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job::Column::ErrorMessage,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.is_in([
                JobStatus::Queued.as_str(),
                JobStatus::Running.as_str(),
            ]))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to cancel job: {}", e)))?;

        Ok(result.rows_affected == 1)
    }

    /// Count running jobs on a device whose priority is below the given
    /// threshold - the preemption candidates.
    pub async fn count_preemptible_jobs(
        &self,
        device_row_id: Uuid,
        below_priority: i32,
    ) -> AppResult<u64> {
        let count = Job::find()
            .filter(job::Column::DeviceId.eq(device_row_id))
            .filter(job::Column::Status.eq(JobStatus::Running.as_str()))
            .filter(job::Column::Priority.lt(below_priority))
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count preemptible jobs: {}", e)))?;

        Ok(count)
    }

    /// Revert preemptible jobs on a device back to `queued`, clearing their
    /// device assignment so they re-enter scheduling. Returns how many rows
    /// were actually reverted.
    pub async fn requeue_preempted_jobs(
        &self,
        device_row_id: Uuid,
        below_priority: i32,
    ) -> AppResult<u64> {
        let result = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(JobStatus::Queued.as_str()))
            .col_expr(job::Column::DeviceId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job::Column::AssignedDeviceName,
                Expr::value(Option::<String>::None),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job::Column::DeviceId.eq(device_row_id))
            .filter(job::Column::Status.eq(JobStatus::Running.as_str()))
            .filter(job::Column::Priority.lt(below_priority))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to requeue preempted jobs: {}", e)))?;

        Ok(result.rows_affected)
    }

    /// Find stale queued jobs not touched since the cutoff - candidates for
    /// the re-dispatch sweep.
    pub async fn find_stale_queued_jobs(
        &self,
        cutoff: chrono::DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<job::Model>> {
        let result = Job::find()
            .filter(job::Column::Status.eq(JobStatus::Queued.as_str()))
            .filter(job::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(job::Column::UpdatedAt)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find stale queued jobs: {}", e)))?;

        Ok(result)
    }

    /// Count jobs with a given priority and status.
    pub async fn count_jobs(&self, priority: i32, status: JobStatus) -> AppResult<u64> {
        let count = Job::find()
            .filter(job::Column::Priority.eq(priority))
            .filter(job::Column::Status.eq(status.as_str()))
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count jobs: {}", e)))?;

        Ok(count)
    }

    /// Get all jobs for a specific app version.
    pub async fn get_jobs_by_app_version(&self, app_version_id: &str) -> AppResult<Vec<job::Model>> {
        let result = Job::find()
            .filter(job::Column::AppVersionId.eq(app_version_id))
            .order_by_asc(job::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get jobs for app version: {}", e)))?;

        Ok(result)
    }

    /// All jobs, used by the batch efficiency summary.
    pub async fn get_all_jobs(&self) -> AppResult<Vec<job::Model>> {
        let result = Job::find()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list jobs: {}", e)))?;

        Ok(result)
    }

    /// Query jobs with filtering and sorting.
    pub async fn query_jobs(&self, query: &ListJobsQuery) -> AppResult<Vec<job::Model>> {
        let mut select = Job::find();

        if let Some(ref app_version_id) = query.app_version_id {
            select = select.filter(job::Column::AppVersionId.eq(app_version_id));
        }

        if let Some(ref status) = query.status {
            // Support comma-separated status values
            if status.contains(',') {
                let statuses: Vec<&str> = status.split(',').map(|s| s.trim()).collect();
                select = select.filter(job::Column::Status.is_in(statuses));
            } else {
                select = select.filter(job::Column::Status.eq(status.as_str()));
            }
        }

        if let Some(priority) = query.priority {
            select = select.filter(job::Column::Priority.eq(priority));
        }

        if let Some(target) = query.target {
            select = select.filter(job::Column::Target.eq(target.as_str()));
        }

        if let Some(ref org_id) = query.org_id {
            select = select.filter(job::Column::OrgId.eq(org_id));
        }

        let descending = query.order != "asc";
        select = match (query.sort.as_str(), descending) {
            ("priority", true) => select.order_by_desc(job::Column::Priority),
            ("priority", false) => select.order_by_asc(job::Column::Priority),
            ("status", true) => select.order_by_desc(job::Column::Status),
            ("status", false) => select.order_by_asc(job::Column::Status),
            (_, true) => select.order_by_desc(job::Column::CreatedAt),
            (_, false) => select.order_by_asc(job::Column::CreatedAt),
        };

        let limit = query.limit.clamp(1, 500);

        let jobs = select
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to query jobs: {}", e)))?;

        Ok(jobs)
    }
}
