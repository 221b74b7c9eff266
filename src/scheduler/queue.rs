//! Bounded, priority-ordered task queue.
//!
//! Draining order is `(priority, created_at, seq)` ascending: lower
//! priority value first, then oldest creation time (FIFO between
//! equal-priority tasks), then enqueue sequence for sub-millisecond
//! ties. Tasks carrying a `scheduled_at` in the future are held back
//! until due. Producers never block: at capacity the worst pending task
//! (highest priority value, newest) is evicted to admit a better one,
//! and an incoming task that is itself the worst is dropped. Urgent
//! threshold-triggered work therefore cannot be starved by a backlog of
//! periodic sweeps.

use super::task::CurationTask;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

type QueueKey = (u8, DateTime<Utc>, u64);

fn key_of(task: &CurationTask, seq: u64) -> QueueKey {
    (task.priority, task.created_at, seq)
}

fn is_due(task: &CurationTask, now: DateTime<Utc>) -> bool {
    task.scheduled_at.map_or(true, |at| at <= now)
}

/// Outcome of a non-blocking enqueue. An evicted task is returned to the
/// caller so per-user bookkeeping (the pending latch) can be unwound.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A worse pending task was evicted to make room
    Evicted(CurationTask),
    /// The incoming task was the worst candidate and was dropped
    Dropped,
}

impl EnqueueOutcome {
    pub fn dropped(&self) -> bool {
        matches!(self, EnqueueOutcome::Dropped)
    }
}

pub struct TaskQueue {
    pending: Mutex<BTreeMap<QueueKey, CurationTask>>,
    notify: Notify,
    capacity: usize,
    seq: AtomicU64,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
            capacity,
            seq: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue with worst-out eviction at capacity.
    pub async fn enqueue(&self, task: CurationTask) -> EnqueueOutcome {
        let key = key_of(&task, self.seq.fetch_add(1, Ordering::Relaxed));

        let mut pending = self.pending.lock().await;
        let outcome = if pending.len() < self.capacity {
            pending.insert(key, task);
            EnqueueOutcome::Enqueued
        } else {
            // The last entry is the worst: highest priority value,
            // then newest. A zero-capacity queue admits nothing.
            match pending.last_key_value().map(|(k, _)| *k) {
                Some(worst_key) if key < worst_key => {
                    let Some((_, evicted)) = pending.pop_last() else {
                        return EnqueueOutcome::Dropped;
                    };
                    warn!(
                        evicted_user = %evicted.user_id,
                        evicted_priority = evicted.priority,
                        admitted_user = %task.user_id,
                        "task queue full, evicted lowest-priority pending task"
                    );
                    pending.insert(key, task);
                    EnqueueOutcome::Evicted(evicted)
                }
                _ => {
                    warn!(
                        user_id = %task.user_id,
                        priority = task.priority,
                        "task queue full, dropping incoming task"
                    );
                    return EnqueueOutcome::Dropped;
                }
            }
        };
        drop(pending);

        self.notify.notify_one();
        outcome
    }

    /// Dequeue the best due pending task, waiting up to `timeout` for
    /// one to arrive. Tasks with a future `scheduled_at` are skipped and
    /// picked up by a later poll once due. Returns `None` on timeout so
    /// workers can poll shutdown.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<CurationTask> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut pending = self.pending.lock().await;
                let now = Utc::now();
                let due_key = pending
                    .iter()
                    .find(|(_, task)| is_due(task, now))
                    .map(|(key, _)| *key);
                if let Some(key) = due_key {
                    if let Some(task) = pending.remove(&key) {
                        debug!(user_id = %task.user_id, "dequeued curation task");
                        return Some(task);
                    }
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{CurationTask, TaskKind, TaskOrigin};
    use chrono::Duration as ChronoDuration;

    fn task(user: &str, priority: u8, age_seconds: i64) -> CurationTask {
        CurationTask {
            user_id: user.to_string(),
            kind: TaskKind::Full,
            origin: TaskOrigin::Periodic,
            priority,
            created_at: Utc::now() - ChronoDuration::seconds(age_seconds),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn test_drains_by_priority_then_age() {
        let queue = TaskQueue::new(8);
        queue.enqueue(task("periodic-new", 1, 0)).await;
        queue.enqueue(task("periodic-old", 1, 60)).await;
        queue.enqueue(task("urgent", 0, 0)).await;

        let order: Vec<String> = [
            queue.dequeue_timeout(Duration::from_millis(10)).await,
            queue.dequeue_timeout(Duration::from_millis(10)).await,
            queue.dequeue_timeout(Duration::from_millis(10)).await,
        ]
        .into_iter()
        .map(|t| t.unwrap().user_id)
        .collect();

        assert_eq!(order, vec!["urgent", "periodic-old", "periodic-new"]);
    }

    #[tokio::test]
    async fn test_eviction_removes_worst_not_arbitrary() {
        let queue = TaskQueue::new(2);
        queue.enqueue(task("old-periodic", 1, 120)).await;
        queue.enqueue(task("new-periodic", 1, 0)).await;

        // High-priority arrival evicts the newest lowest-priority task.
        let outcome = queue.enqueue(task("urgent", 0, 0)).await;
        match outcome {
            EnqueueOutcome::Evicted(evicted) => assert_eq!(evicted.user_id, "new-periodic"),
            other => panic!("expected eviction, got {other:?}"),
        }

        let first = queue.dequeue_timeout(Duration::from_millis(10)).await.unwrap();
        let second = queue.dequeue_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.user_id, "urgent");
        assert_eq!(second.user_id, "old-periodic");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_incoming_worst_is_dropped() {
        let queue = TaskQueue::new(2);
        queue.enqueue(task("a", 0, 0)).await;
        queue.enqueue(task("b", 0, 0)).await;

        let outcome = queue.enqueue(task("late-periodic", 1, 0)).await;
        assert!(outcome.dropped());
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = TaskQueue::new(2);
        let got = queue.dequeue_timeout(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(TaskQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_timeout(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(task("wake", 0, 0)).await;

        let got = consumer.await.unwrap();
        assert_eq!(got.unwrap().user_id, "wake");
    }

    #[tokio::test]
    async fn test_deferred_task_held_until_due() {
        let queue = TaskQueue::new(4);
        let mut deferred = task("deferred", 0, 0);
        deferred.scheduled_at = Some(Utc::now() + ChronoDuration::milliseconds(60));
        queue.enqueue(deferred).await;

        // Not due yet: the dequeue times out even though the queue is
        // non-empty.
        let got = queue.dequeue_timeout(Duration::from_millis(10)).await;
        assert!(got.is_none());
        assert_eq!(queue.len().await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let got = queue.dequeue_timeout(Duration::from_millis(10)).await;
        assert_eq!(got.unwrap().user_id, "deferred");
    }

    #[tokio::test]
    async fn test_due_task_dequeues_past_deferred_head() {
        let queue = TaskQueue::new(4);
        // Best-ordered task is deferred; a worse-priority due task must
        // still come out first.
        let mut deferred = task("deferred-urgent", 0, 0);
        deferred.scheduled_at = Some(Utc::now() + ChronoDuration::seconds(60));
        queue.enqueue(deferred).await;
        queue.enqueue(task("due-periodic", 1, 0)).await;

        let got = queue.dequeue_timeout(Duration::from_millis(10)).await;
        assert_eq!(got.unwrap().user_id, "due-periodic");
        assert_eq!(queue.len().await, 1);
    }
}
