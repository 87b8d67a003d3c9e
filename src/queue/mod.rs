//! Task transport and worker pool.
//!
//! One queue per priority tier; enqueue routes by the priority router.
//! Workers drain higher tiers preferentially, one task (one job id) at a
//! time. Delivery is at-least-once: the coordinator's idempotency check
//! absorbs duplicates, and a periodic sweep re-dispatches queued jobs whose
//! delivery was lost (including jobs requeued by preemption).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::scheduler::{BatchCoordinator, Tier};

/// Idle backoff for workers when every tier is empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sending half of the tiered transport. Cheap to clone into handlers.
#[derive(Clone)]
pub struct JobQueues {
    high: UnboundedSender<Uuid>,
    normal: UnboundedSender<Uuid>,
    low: UnboundedSender<Uuid>,
}

/// Receiving half, shared by the worker pool.
pub struct TierReceivers {
    high: UnboundedReceiver<Uuid>,
    normal: UnboundedReceiver<Uuid>,
    low: UnboundedReceiver<Uuid>,
}

impl TierReceivers {
    /// Take the next job id, highest tier first.
    fn next_job(&mut self) -> Option<Uuid> {
        self.high
            .try_recv()
            .or_else(|_| self.normal.try_recv())
            .or_else(|_| self.low.try_recv())
            .ok()
    }
}

/// Create the transport pair.
pub fn job_queues() -> (JobQueues, TierReceivers) {
    let (high_tx, high_rx) = mpsc::unbounded_channel();
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    let (low_tx, low_rx) = mpsc::unbounded_channel();

    (
        JobQueues {
            high: high_tx,
            normal: normal_tx,
            low: low_tx,
        },
        TierReceivers {
            high: high_rx,
            normal: normal_rx,
            low: low_rx,
        },
    )
}

impl JobQueues {
    /// Enqueue one task invocation for a job, routed by priority.
    pub fn enqueue(&self, job_id: Uuid, priority: i32) -> AppResult<()> {
        let tier = Tier::route(priority);
        let sender = match tier {
            Tier::High => &self.high,
            Tier::Normal => &self.normal,
            Tier::Low => &self.low,
        };

        sender
            .send(job_id)
            .map_err(|_| AppError::Queue(format!("{} queue is closed", tier.queue_name())))?;

        debug!(
            "Routed job {} (priority {}) to queue: {}",
            job_id,
            priority,
            tier.queue_name()
        );
        Ok(())
    }
}

/// Spawn the worker pool. Each worker loops taking one job id at a time and
/// runs the batch coordinator for it.
pub fn spawn_workers(count: usize, receivers: TierReceivers, coordinator: BatchCoordinator) {
    let shared = Arc::new(Mutex::new(receivers));

    info!("Starting {} scheduler workers", count);
    for worker_id in 0..count {
        let receivers = Arc::clone(&shared);
        let coordinator = coordinator.clone();

        tokio::spawn(async move {
            worker_loop(worker_id, receivers, coordinator).await;
        });
    }
}

async fn worker_loop(
    worker_id: usize,
    receivers: Arc<Mutex<TierReceivers>>,
    coordinator: BatchCoordinator,
) {
    info!("Worker {} started", worker_id);

    loop {
        let next = {
            let mut guard = receivers.lock().expect("Queue mutex poisoned");
            guard.next_job()
        };

        match next {
            Some(job_id) => {
                debug!("Worker {} picked up job {}", worker_id, job_id);
                let outcome = coordinator.process(job_id).await;
                if let Some(error) = outcome.error {
                    error!(
                        "Worker {} finished job {} with error: {}",
                        worker_id, job_id, error
                    );
                } else {
                    debug!(
                        "Worker {} finished job {} with status {}",
                        worker_id, job_id, outcome.status
                    );
                }
            }
            None => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
        }
    }
}

/// Start the re-dispatch sweep. Queued jobs not touched within one sweep
/// interval are enqueued again; duplicates are harmless because processing
/// is idempotent on non-queued jobs.
pub fn start_requeue_sweep(pool: DbPool, queues: JobQueues, interval_secs: u64) {
    tokio::spawn(async move {
        info!("Starting requeue sweep (interval: {} seconds)", interval_secs);

        let mut ticker = interval(Duration::from_secs(interval_secs));

        loop {
            ticker.tick().await;

            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(interval_secs as i64);
            match pool.find_stale_queued_jobs(cutoff, 100).await {
                Ok(stale) => {
                    if stale.is_empty() {
                        continue;
                    }
                    info!("Re-dispatching {} stale queued jobs", stale.len());
                    for job in stale {
                        if let Err(e) = queues.enqueue(job.id, job.priority) {
                            error!("Failed to re-dispatch job {}: {}", job.id, e);
                        }
                    }
                }
                Err(e) => error!("Requeue sweep error: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_routes_by_priority() {
        let (queues, mut receivers) = job_queues();

        let high = Uuid::new_v4();
        let normal = Uuid::new_v4();
        let low = Uuid::new_v4();

        queues.enqueue(low, 1).unwrap();
        queues.enqueue(normal, 3).unwrap();
        queues.enqueue(high, 5).unwrap();

        // Drain order is tier-biased regardless of enqueue order.
        assert_eq!(receivers.next_job(), Some(high));
        assert_eq!(receivers.next_job(), Some(normal));
        assert_eq!(receivers.next_job(), Some(low));
        assert_eq!(receivers.next_job(), None);
    }
}
