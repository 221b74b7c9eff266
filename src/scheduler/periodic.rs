//! Periodic sweep trigger.
//!
//! A low-priority safety net behind the threshold monitor: on a fixed
//! interval it scans known users and queues curation for anyone whose
//! memory has not been curated recently, so slow-trickle users still get
//! cleaned up even if they never cross the insertion threshold.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::scheduler::queue::{EnqueueOutcome, TaskQueue};
use crate::scheduler::state::SchedulerStateStore;
use crate::scheduler::task::CurationTask;

pub struct PeriodicTrigger {
    config: SchedulerConfig,
    state: Arc<SchedulerStateStore>,
    queue: Arc<TaskQueue>,
}

impl PeriodicTrigger {
    pub fn new(
        config: SchedulerConfig,
        state: Arc<SchedulerStateStore>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            config,
            state,
            queue,
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.periodic_interval_seconds);
            let mut ticker = tokio::time::interval(period);
            // The immediate first tick would sweep before any user has
            // had a chance to accumulate anything.
            ticker.tick().await;

            info!(
                interval_seconds = self.config.periodic_interval_seconds,
                "periodic trigger started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("periodic trigger stopped");
        })
    }

    async fn sweep(&self) {
        // A user is stale once two full intervals have passed without a
        // successful curation; never-curated users get a grace period
        // from when they were first seen.
        let stale_after =
            ChronoDuration::seconds((self.config.periodic_interval_seconds * 2) as i64);
        let grace = ChronoDuration::seconds(self.config.periodic_grace_seconds as i64);

        let due = self.state.stale_users(stale_after, grace).await;
        if due.is_empty() {
            debug!("periodic sweep found no stale users");
            return;
        }

        info!(count = due.len(), "periodic sweep queueing stale users");
        for user_id in due {
            self.state.mark_pending(&user_id).await;
            match self.queue.enqueue(CurationTask::periodic(&user_id)).await {
                EnqueueOutcome::Enqueued => {}
                EnqueueOutcome::Evicted(evicted) => {
                    self.state.clear_pending(&evicted.user_id).await;
                }
                EnqueueOutcome::Dropped => {
                    self.state.clear_pending(&user_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(state: Arc<SchedulerStateStore>, queue: Arc<TaskQueue>) -> PeriodicTrigger {
        let config = SchedulerConfig {
            periodic_interval_seconds: 1,
            periodic_grace_seconds: 0,
            ..SchedulerConfig::default()
        };
        PeriodicTrigger::new(config, state, queue)
    }

    #[tokio::test]
    async fn test_sweep_queues_never_curated_user_past_grace() {
        let state = Arc::new(SchedulerStateStore::new(5));
        let queue = Arc::new(TaskQueue::new(16));
        state.record_insert("u1", 100).await;

        // Zero grace makes the never-curated user immediately due.
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger(Arc::clone(&state), Arc::clone(&queue)).sweep().await;

        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_does_not_duplicate_pending_user() {
        let state = Arc::new(SchedulerStateStore::new(5));
        let queue = Arc::new(TaskQueue::new(16));
        state.record_insert("u1", 100).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let t = trigger(Arc::clone(&state), Arc::clone(&queue));
        t.sweep().await;
        t.sweep().await;

        // Second sweep sees the task_pending latch and skips the user.
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_running_user() {
        let state = Arc::new(SchedulerStateStore::new(5));
        let queue = Arc::new(TaskQueue::new(16));
        state.record_insert("u1", 100).await;
        state.try_begin_run("u1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        trigger(Arc::clone(&state), Arc::clone(&queue)).sweep().await;
        assert!(queue.is_empty().await);
    }
}
