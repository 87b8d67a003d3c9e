//! Batch coordination.
//!
//! Entry point invoked once per delivered task. Claims the cohort of queued
//! jobs sharing the triggering job's app build and target, pays the app
//! installation cost once for the whole cohort, executes each job's test
//! sequentially, and reconciles job and device state - including on partial
//! failure. Duplicate deliveries are absorbed by the idempotency check on the
//! triggering job's status.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RunnerKind;
use crate::db::DbPool;
use crate::entity::{device, job};
use crate::error::AppError;
use crate::models::{JobStatus, TargetType};
use crate::runner::{build_runner, TestResults, TestRunner};
use crate::scheduler::allocator::DeviceAllocator;

/// Factory producing a runner for a batch's target. Injected so tests can
/// substitute an instant mock.
pub type RunnerFactory = Arc<dyn Fn(TargetType) -> Arc<dyn TestRunner> + Send + Sync>;

/// Outcome of one task invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// The triggering job.
    pub job_id: Uuid,
    /// The triggering job's final status.
    pub status: JobStatus,
    /// Error for failure outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Batch summary when a cohort was executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
}

impl BatchOutcome {
    fn failure(job_id: Uuid, error: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            error: Some(error),
            batch: None,
        }
    }

    fn idempotent(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            error: None,
            batch: None,
        }
    }
}

/// Summary of one executed batch. `time_saved_seconds` is the installation
/// cost avoided by sharing one install across the cohort.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_jobs: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    /// Device name the cohort ran on.
    pub device_used: String,
    /// Shared installation duration, in seconds.
    pub installation_seconds: u64,
    /// `(cohort size - 1) x installation duration`.
    pub time_saved_seconds: u64,
    /// Per-job results in execution order.
    pub results: Vec<JobRunResult>,
}

/// Result of one cohort member's execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<TestResults>,
}

/// Coordinates batch claiming and execution for delivered tasks.
#[derive(Clone)]
pub struct BatchCoordinator {
    db: DbPool,
    runners: RunnerFactory,
    execution_timeout: Duration,
}

impl BatchCoordinator {
    /// Coordinator using the configured runner backend.
    pub fn new(db: DbPool, kind: RunnerKind, execution_timeout: Duration) -> Self {
        Self {
            db,
            runners: Arc::new(move |target| build_runner(kind, target)),
            execution_timeout,
        }
    }

    /// Coordinator with an injected runner factory (test seam).
    pub fn with_runner_factory(
        db: DbPool,
        runners: RunnerFactory,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            db,
            runners,
            execution_timeout,
        }
    }

    /// Process one delivered task. Never panics the worker: every failure
    /// path resolves to a terminal job status and a failure outcome.
    pub async fn process(&self, job_id: Uuid) -> BatchOutcome {
        info!("Starting to process job {}", job_id);

        let job = match self.db.get_job_by_id(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let msg = format!("Job {} not found", job_id);
                error!("{}", msg);
                return BatchOutcome::failure(job_id, msg);
            }
            Err(e) => {
                error!("Failed to load job {}: {}", job_id, e);
                return BatchOutcome::failure(job_id, e.to_string());
            }
        };

        // Duplicate delivery or a job already claimed into another cohort.
        let status = JobStatus::parse(&job.status).unwrap_or(JobStatus::Failed);
        if status != JobStatus::Queued {
            info!("Job {} already processed with status {}", job_id, status);
            return BatchOutcome::idempotent(job_id, status);
        }

        let Some(target) = TargetType::parse(&job.target) else {
            let msg = format!("Job {} has unknown target {}", job_id, job.target);
            error!("{}", msg);
            let _ = self.db.fail_queued_job(job_id, &msg).await;
            return BatchOutcome::failure(job_id, msg);
        };

        let allocator = DeviceAllocator::new(&self.db);
        let Some(allocated) = allocator.allocate(target, job.priority).await else {
            let msg = format!("No available devices for target type {}", target);
            error!("{}", msg);
            if let Err(e) = self.db.fail_queued_job(job_id, &msg).await {
                error!("Failed to mark job {} as failed: {}", job_id, e);
            }
            return BatchOutcome::failure(job_id, msg);
        };

        info!(
            "Allocated device {} for job {}",
            allocated.device_id, job_id
        );

        // run_batch reconciles claimed jobs and releases the device on every
        // path, so the error arm only has to report.
        match self.run_batch(&job, target, &allocated).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = format!("Error processing batch for job {}: {}", job_id, e);
                error!("{}", msg);
                BatchOutcome::failure(job_id, msg)
            }
        }
    }

    /// Claim and execute the cohort on an allocated device.
    async fn run_batch(
        &self,
        trigger: &job::Model,
        target: TargetType,
        allocated: &device::Model,
    ) -> Result<BatchOutcome, AppError> {
        let allocator = DeviceAllocator::new(&self.db);

        let cohort = match self.claim_cohort(trigger, target, allocated).await {
            Ok(cohort) => cohort,
            Err(e) => {
                // Claim failed before any member could be executed.
                allocator.release(allocated.id).await;
                return Err(e);
            }
        };

        if cohort.is_empty() {
            // Every candidate row was claimed by a competing worker between
            // our read and our compare-and-swap. The triggering job is in
            // that competitor's cohort; report its current status.
            warn!(
                "Cohort for job {} was claimed concurrently; yielding",
                trigger.id
            );
            allocator.release(allocated.id).await;
            let status = self
                .db
                .get_job_by_id(trigger.id)
                .await
                .ok()
                .flatten()
                .and_then(|j| JobStatus::parse(&j.status))
                .unwrap_or(JobStatus::Queued);
            return Ok(BatchOutcome::idempotent(trigger.id, status));
        }

        let batch_ids: Vec<Uuid> = cohort.iter().map(|j| j.id).collect();
        info!("Claimed batch of {} jobs: {:?}", cohort.len(), batch_ids);
        info!(
            "Batch details: app_version_id={}, target={}, device={}",
            trigger.app_version_id, target, allocated.device_id
        );

        // One installation for the whole cohort; the amortized remainder is
        // the headline efficiency metric.
        let installation_seconds = target.install_duration_secs();
        info!(
            "Installing app {} on {} for batch ({}s)",
            trigger.app_version_id, target, installation_seconds
        );

        let runner = (self.runners)(target);
        let mut results = Vec::with_capacity(cohort.len());
        let mut successful_jobs = 0u64;
        let mut failed_jobs = 0u64;

        for member in &cohort {
            info!("Processing job {}: {}", member.id, member.test_path);
            let result = self.run_member(runner.as_ref(), member).await;

            match result.status {
                JobStatus::Completed => successful_jobs += 1,
                _ => failed_jobs += 1,
            }
            info!("Job {} completed with status: {}", member.id, result.status);
            results.push(result);
        }

        allocator.release(allocated.id).await;
        info!(
            "Released device {} after batch completion",
            allocated.device_id
        );

        let time_saved_seconds = (cohort.len() as u64 - 1) * installation_seconds;
        info!(
            "Batch processing completed: total={}, successful={}, failed={}, device={}, time saved={}s",
            cohort.len(),
            successful_jobs,
            failed_jobs,
            allocated.device_id,
            time_saved_seconds
        );

        let trigger_status = results
            .iter()
            .find(|r| r.job_id == trigger.id)
            .map(|r| r.status)
            .unwrap_or(JobStatus::Failed);

        Ok(BatchOutcome {
            job_id: trigger.id,
            status: trigger_status,
            error: None,
            batch: Some(BatchSummary {
                total_jobs: cohort.len() as u64,
                successful_jobs,
                failed_jobs,
                device_used: allocated.device_id.clone(),
                installation_seconds,
                time_saved_seconds,
                results,
            }),
        })
    }

    /// Claim every queued job sharing the trigger's app build and target.
    /// Each row is taken with a compare-and-swap on its status, so two
    /// workers sweeping overlapping cohorts can never both claim the same
    /// job; the returned set is exactly the rows this worker won. On a
    /// mid-claim store error the rows already won are failed terminally so
    /// none is left `running` without an executor.
    async fn claim_cohort(
        &self,
        trigger: &job::Model,
        target: TargetType,
        allocated: &device::Model,
    ) -> Result<Vec<job::Model>, AppError> {
        let candidates = self
            .db
            .find_queued_cohort(&trigger.app_version_id, target)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self
                .db
                .claim_job(candidate.id, allocated.id, &allocated.device_id)
                .await
            {
                Ok(true) => claimed.push(candidate),
                Ok(false) => {}
                Err(e) => {
                    for member in &claimed {
                        if let Err(e) = self
                            .db
                            .finish_running_job(
                                member.id,
                                JobStatus::Failed,
                                Some("Batch processing error"),
                            )
                            .await
                        {
                            error!("Failed to reconcile claimed job {}: {}", member.id, e);
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(claimed)
    }

    /// Execute one cohort member and write its terminal status. The terminal
    /// write is conditional on the job still being `running`, so an external
    /// cancellation that landed mid-batch wins.
    async fn run_member(&self, runner: &dyn TestRunner, member: &job::Model) -> JobRunResult {
        let run = tokio::time::timeout(
            self.execution_timeout,
            runner.run_tests(&member.test_path, &member.app_version_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AppError::Execution(format!(
                "Test execution timed out after {}s",
                self.execution_timeout.as_secs()
            )))
        });

        match run {
            Ok(results) => {
                match self
                    .db
                    .finish_running_job(member.id, JobStatus::Completed, None)
                    .await
                {
                    Ok(true) => JobRunResult {
                        job_id: member.id,
                        status: JobStatus::Completed,
                        error: None,
                        results: Some(results),
                    },
                    Ok(false) => {
                        // Cancelled or preempted out from under us.
                        warn!(
                            "Job {} left running state mid-batch; keeping external status",
                            member.id
                        );
                        self.reloaded_result(member.id, None).await
                    }
                    Err(e) => {
                        error!("Failed to record completion for job {}: {}", member.id, e);
                        JobRunResult {
                            job_id: member.id,
                            status: JobStatus::Failed,
                            error: Some(e.to_string()),
                            results: Some(results),
                        }
                    }
                }
            }
            Err(e) => {
                let error_msg = format!("Error processing job {}: {}", member.id, e);
                error!("{}", error_msg);
                match self
                    .db
                    .finish_running_job(member.id, JobStatus::Failed, Some(&error_msg))
                    .await
                {
                    Ok(true) => JobRunResult {
                        job_id: member.id,
                        status: JobStatus::Failed,
                        error: Some(error_msg),
                        results: None,
                    },
                    Ok(false) => self.reloaded_result(member.id, Some(error_msg)).await,
                    Err(db_err) => {
                        error!("Failed to record failure for job {}: {}", member.id, db_err);
                        JobRunResult {
                            job_id: member.id,
                            status: JobStatus::Failed,
                            error: Some(error_msg),
                            results: None,
                        }
                    }
                }
            }
        }
    }

    /// Report whatever status an out-of-band writer left on the job.
    async fn reloaded_result(&self, job_id: Uuid, error: Option<String>) -> JobRunResult {
        let status = self
            .db
            .get_job_by_id(job_id)
            .await
            .ok()
            .flatten()
            .and_then(|j| JobStatus::parse(&j.status))
            .unwrap_or(JobStatus::Failed);

        JobRunResult {
            job_id,
            status,
            error,
            results: None,
        }
    }
}
