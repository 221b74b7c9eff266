//! Per-user scheduler state.
//!
//! One entry per user, created lazily on first notification and never
//! deleted (bounded by the active-user count). Each entry carries its
//! own lock so unrelated users' bookkeeping never serializes; the store
//! map itself is only write-locked to insert a new user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug)]
pub struct UserState {
    /// Insertions since the last successful curation
    pub pending_inserts: u64,
    /// A threshold task has been emitted and not yet resolved; suppresses
    /// duplicate emission while the counter keeps accumulating
    pub task_pending: bool,
    pub last_curated_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub is_running: bool,
    /// Recent query texts, oldest first; rerank context window
    pub recent_queries: VecDeque<String>,
}

impl UserState {
    fn new() -> Self {
        Self {
            pending_inserts: 0,
            task_pending: false,
            last_curated_at: None,
            first_seen_at: Utc::now(),
            is_running: false,
            recent_queries: VecDeque::new(),
        }
    }
}

/// Serializable per-user view for the status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStateSnapshot {
    pub pending_inserts: u64,
    pub last_curated_at: Option<DateTime<Utc>>,
    pub is_running: bool,
}

#[derive(Debug, Default)]
pub struct RunCounters {
    pub total: AtomicU64,
    pub successful: AtomicU64,
    pub failed: AtomicU64,
    /// Tasks re-enqueued because their user was already running
    pub requeued: AtomicU64,
}

pub struct SchedulerStateStore {
    users: RwLock<HashMap<String, Arc<Mutex<UserState>>>>,
    context_window: usize,
    pub counters: RunCounters,
}

impl SchedulerStateStore {
    pub fn new(context_window: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            context_window,
            counters: RunCounters::default(),
        }
    }

    async fn entry(&self, user_id: &str) -> Arc<Mutex<UserState>> {
        if let Some(state) = self.users.read().await.get(user_id) {
            return Arc::clone(state);
        }
        let mut users = self.users.write().await;
        Arc::clone(
            users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(UserState::new()))),
        )
    }

    /// Record one memory insertion. Returns true when the configured
    /// threshold was crossed and no task is already pending; the caller
    /// must then enqueue exactly one threshold-triggered task.
    pub async fn record_insert(&self, user_id: &str, threshold: u64) -> bool {
        let entry = self.entry(user_id).await;
        let mut state = entry.lock().await;
        state.pending_inserts += 1;
        debug!(user_id, count = state.pending_inserts, "memory insertion recorded");

        if state.pending_inserts >= threshold && !state.task_pending {
            state.task_pending = true;
            true
        } else {
            false
        }
    }

    /// Record a recent query into the user's context ring.
    pub async fn record_query(&self, user_id: &str, query: String) {
        let entry = self.entry(user_id).await;
        let mut state = entry.lock().await;
        state.recent_queries.push_back(query);
        while state.recent_queries.len() > self.context_window {
            state.recent_queries.pop_front();
        }
    }

    /// The user's recent queries, oldest first.
    pub async fn query_context(&self, user_id: &str) -> Vec<String> {
        let entry = self.entry(user_id).await;
        let state = entry.lock().await;
        state.recent_queries.iter().cloned().collect()
    }

    /// Claim the per-user run slot. Returns false if a run is already in
    /// flight for this user.
    pub async fn try_begin_run(&self, user_id: &str) -> bool {
        let entry = self.entry(user_id).await;
        let mut state = entry.lock().await;
        if state.is_running {
            return false;
        }
        state.is_running = true;
        true
    }

    /// Release the run slot. The insertion counter only resets on
    /// success, so a failed run leaves the accumulated volume visible to
    /// the next trigger; the pending latch always clears so the next
    /// crossing can re-emit.
    pub async fn finish_run(&self, user_id: &str, success: bool) {
        let entry = self.entry(user_id).await;
        let mut state = entry.lock().await;
        state.is_running = false;
        state.task_pending = false;
        if success {
            state.pending_inserts = 0;
            state.last_curated_at = Some(Utc::now());
        }
        drop(state);

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.counters.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Users due for a periodic sweep: last curated longer ago than
    /// `stale_after`, or never curated and first seen longer ago than
    /// `grace`. Users with a run in flight are skipped.
    pub async fn stale_users(&self, stale_after: Duration, grace: Duration) -> Vec<String> {
        let now = Utc::now();
        let users: Vec<(String, Arc<Mutex<UserState>>)> = self
            .users
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect();

        let mut due = Vec::new();
        for (user_id, entry) in users {
            let state = entry.lock().await;
            if state.is_running || state.task_pending {
                continue;
            }
            let is_stale = match state.last_curated_at {
                Some(last) => now - last > stale_after,
                None => now - state.first_seen_at > grace,
            };
            if is_stale {
                due.push(user_id);
            }
        }
        due
    }

    /// Mark users handed to the periodic trigger as pending so the next
    /// sweep does not duplicate them while they sit in the queue.
    pub async fn mark_pending(&self, user_id: &str) {
        let entry = self.entry(user_id).await;
        entry.lock().await.task_pending = true;
    }

    /// Drop the pending latch without touching run state. Used when a
    /// queued task for this user was rejected before it ever ran.
    pub async fn clear_pending(&self, user_id: &str) {
        let entry = self.entry(user_id).await;
        entry.lock().await.task_pending = false;
    }

    pub async fn running_count(&self) -> usize {
        let users: Vec<Arc<Mutex<UserState>>> =
            self.users.read().await.values().cloned().collect();
        let mut count = 0;
        for entry in users {
            if entry.lock().await.is_running {
                count += 1;
            }
        }
        count
    }

    pub async fn snapshot(&self) -> HashMap<String, UserStateSnapshot> {
        let users: Vec<(String, Arc<Mutex<UserState>>)> = self
            .users
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect();

        let mut out = HashMap::with_capacity(users.len());
        for (user_id, entry) in users {
            let state = entry.lock().await;
            out.insert(
                user_id,
                UserStateSnapshot {
                    pending_inserts: state.pending_inserts,
                    last_curated_at: state.last_curated_at,
                    is_running: state.is_running,
                },
            );
        }
        out
    }
}
