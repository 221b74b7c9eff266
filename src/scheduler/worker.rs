//! Curation worker pool.
//!
//! A fixed set of workers drains the task queue. Each worker claims the
//! per-user run slot before touching memory, so two tasks for the same
//! user never execute concurrently; the loser re-queues its task after a
//! short jittered delay instead of discarding it.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::memory::pipeline::CurationPipeline;
use crate::scheduler::queue::{EnqueueOutcome, TaskQueue};
use crate::scheduler::state::SchedulerStateStore;
use crate::scheduler::task::CurationTask;

/// Poll interval for the dequeue loop; bounds shutdown latency.
const DEQUEUE_WAIT: Duration = Duration::from_millis(500);

pub struct WorkerPool {
    config: SchedulerConfig,
    state: Arc<SchedulerStateStore>,
    queue: Arc<TaskQueue>,
    pipeline: Arc<CurationPipeline>,
}

impl WorkerPool {
    pub fn new(
        config: SchedulerConfig,
        state: Arc<SchedulerStateStore>,
        queue: Arc<TaskQueue>,
        pipeline: Arc<CurationPipeline>,
    ) -> Self {
        Self {
            config,
            state,
            queue,
            pipeline,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);
        (0..pool.config.worker_count)
            .map(|worker_id| {
                let pool = Arc::clone(&pool);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize, shutdown: watch::Receiver<bool>) {
        info!(worker_id, "curation worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(task) = self.queue.dequeue_timeout(DEQUEUE_WAIT).await else {
                continue;
            };
            // Producers are stopped before workers during shutdown, so a
            // task dequeued here still gets executed rather than lost.
            self.execute(worker_id, task).await;
        }
        info!(worker_id, "curation worker stopped");
    }

    async fn execute(&self, worker_id: usize, mut task: CurationTask) {
        if !self.state.try_begin_run(&task.user_id).await {
            // Another worker holds this user; put the task back with a
            // short jittered deferral so we don't spin on the same
            // head-of-queue entry.
            debug!(worker_id, user_id = %task.user_id, "user busy, re-queueing task");
            self.state
                .counters
                .requeued
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let jitter = rand::thread_rng().gen_range(50..250);
            task.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(jitter));
            let user_id = task.user_id.clone();
            match self.queue.enqueue(task).await {
                EnqueueOutcome::Evicted(evicted) => {
                    self.state.clear_pending(&evicted.user_id).await;
                }
                EnqueueOutcome::Dropped => {
                    self.state.clear_pending(&user_id).await;
                }
                EnqueueOutcome::Enqueued => {}
            }
            return;
        }

        let context = self.state.query_context(&task.user_id).await;
        let result = self
            .pipeline
            .run(&task.user_id, task.kind, &context)
            .await;

        match &result {
            Ok(run) => {
                info!(
                    worker_id,
                    user_id = %task.user_id,
                    origin = task.origin.as_str(),
                    duration_seconds = run.duration_seconds,
                    before = run.before_stats.item_count,
                    after = run.after_stats.item_count,
                    "curation run completed"
                );
            }
            Err(err) => {
                error!(
                    worker_id,
                    user_id = %task.user_id,
                    origin = task.origin.as_str(),
                    %err,
                    "curation run failed"
                );
            }
        }
        self.state.finish_run(&task.user_id, result.is_ok()).await;
    }
}
