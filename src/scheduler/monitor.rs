//! Threshold monitor.
//!
//! Receives fire-and-forget notifications from the ingestion path over a
//! bounded channel and turns threshold crossings into queued curation
//! tasks. The sender never blocks; when the channel is full the
//! notification is dropped and the periodic sweep eventually covers the
//! user anyway.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::queue::{EnqueueOutcome, TaskQueue};
use crate::scheduler::state::SchedulerStateStore;
use crate::scheduler::task::CurationTask;

/// Events the ingestion path reports to the scheduler.
#[derive(Debug)]
pub enum MemoryEvent {
    Added { user_id: String },
    QueryObserved { user_id: String, query: String },
}

#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MemoryEvent>,
}

impl MonitorHandle {
    /// Report one memory insertion. Never blocks or fails.
    pub fn notify_memory_added(&self, user_id: &str) {
        let event = MemoryEvent::Added {
            user_id: user_id.to_string(),
        };
        if let Err(err) = self.tx.try_send(event) {
            debug!(user_id, %err, "monitor channel full, dropping insertion event");
        }
    }

    /// Report a user query for the rerank context window. Never blocks.
    pub fn note_query(&self, user_id: &str, query: &str) {
        let event = MemoryEvent::QueryObserved {
            user_id: user_id.to_string(),
            query: query.to_string(),
        };
        if let Err(err) = self.tx.try_send(event) {
            debug!(user_id, %err, "monitor channel full, dropping query event");
        }
    }
}

pub struct ThresholdMonitor {
    config: SchedulerConfig,
    state: Arc<SchedulerStateStore>,
    queue: Arc<TaskQueue>,
}

impl ThresholdMonitor {
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

    /// Spawn the drain loop. Returns the handle the ingestion path uses
    /// plus the join handle for shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> (MonitorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(self.config.notify_channel_capacity);
        let handle = MonitorHandle { tx };

        let join = tokio::spawn(async move {
            info!(
                threshold = self.config.auto_curate_threshold,
                "threshold monitor started"
            );
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Some(event) => self.handle_event(event).await,
                            None => break,
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("threshold monitor stopped");
        });

        (handle, join)
    }

    async fn handle_event(&self, event: MemoryEvent) {
        match event {
            MemoryEvent::Added { user_id } => {
                let crossed = self
                    .state
                    .record_insert(&user_id, self.config.auto_curate_threshold)
                    .await;
                if crossed {
                    info!(user_id, "insertion threshold crossed, queueing curation");
                    let task = CurationTask::threshold_triggered(&user_id);
                    match self.queue.enqueue(task).await {
                        EnqueueOutcome::Enqueued => {}
                        EnqueueOutcome::Evicted(evicted) => {
                            // The evicted user's latch must lift so a later
                            // crossing or sweep can retry them.
                            self.state.clear_pending(&evicted.user_id).await;
                        }
                        EnqueueOutcome::Dropped => {
                            warn!(user_id, "queue rejected threshold task");
                            self.state.clear_pending(&user_id).await;
                        }
                    }
                }
            }
            MemoryEvent::QueryObserved { user_id, query } => {
                self.state.record_query(&user_id, query).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::queue::TaskQueue;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn test_config(threshold: u64) -> SchedulerConfig {
        SchedulerConfig {
            auto_curate_threshold: threshold,
            ..SchedulerConfig::default()
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_threshold_crossing_enqueues_one_task() {
        let state = Arc::new(SchedulerStateStore::new(5));
        let queue = Arc::new(TaskQueue::new(16));
        let monitor = ThresholdMonitor::new(test_config(3), state, Arc::clone(&queue));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, join) = monitor.spawn(stop_rx);

        for _ in 0..5 {
            handle.notify_memory_added("u1");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Five insertions past a threshold of three yield exactly one task.
        assert_eq!(queue.len().await, 1);
        let task = queue
            .dequeue_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(task.user_id, "u1");
        assert!(logs_contain("insertion threshold crossed"));

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_queries_feed_context_window() {
        let state = Arc::new(SchedulerStateStore::new(5));
        let queue = Arc::new(TaskQueue::new(16));
        let monitor =
            ThresholdMonitor::new(test_config(100), Arc::clone(&state), queue);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, join) = monitor.spawn(stop_rx);

        handle.note_query("u1", "what do I like?");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            state.query_context("u1").await,
            vec!["what do I like?".to_string()]
        );

        drop(handle);
        join.await.unwrap();
    }
}
