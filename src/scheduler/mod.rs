//! Background curation scheduling.
//!
//! The [`CurationScheduler`] owns everything between "a memory was
//! added" and "this user's working memory was curated": the threshold
//! monitor, the periodic sweep, the bounded task queue, and the worker
//! pool that drives the [`CurationPipeline`](crate::memory::pipeline::CurationPipeline).

pub mod monitor;
pub mod periodic;
pub mod queue;
pub mod state;
pub mod status;
pub mod task;
pub mod worker;

pub use monitor::{MonitorHandle, ThresholdMonitor};
pub use periodic::PeriodicTrigger;
pub use queue::{EnqueueOutcome, TaskQueue};
pub use state::{SchedulerStateStore, UserStateSnapshot};
pub use status::{SchedulerStatus, StatusReporter};
pub use task::{CurationTask, TaskKind, TaskOrigin};
pub use worker::WorkerPool;

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::memory::analysis::{MemoryAnalysis, MemoryAnalyzer};
use crate::memory::error::{CuratorError, Result};
use crate::memory::models::CurationRunResult;
use crate::memory::pipeline::CurationPipeline;
use crate::memory::provider::WorkingMemoryProvider;
use crate::relevance::RelevanceProvider;

struct BackgroundTasks {
    monitor_handle: MonitorHandle,
    monitor: JoinHandle<()>,
    periodic: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    // Producers (monitor, periodic) listen on the first channel, workers
    // on the second, so shutdown can stop them in that order.
    producer_stop: watch::Sender<bool>,
    worker_stop: watch::Sender<bool>,
}

/// Facade over the background curation machinery.
pub struct CurationScheduler {
    config: Config,
    state: Arc<SchedulerStateStore>,
    queue: Arc<TaskQueue>,
    pipeline: Arc<CurationPipeline>,
    analyzer: MemoryAnalyzer,
    reporter: StatusReporter,
    background: Mutex<Option<BackgroundTasks>>,
    shut_down: Mutex<bool>,
}

impl CurationScheduler {
    pub fn new(
        config: Config,
        memory: Arc<dyn WorkingMemoryProvider>,
        relevance: Arc<dyn RelevanceProvider>,
    ) -> Self {
        let state = Arc::new(SchedulerStateStore::new(
            config.curation.context_window_size,
        ));
        let queue = Arc::new(TaskQueue::new(config.scheduler.queue_capacity));
        let pipeline = Arc::new(CurationPipeline::new(
            config.curation.clone(),
            Arc::clone(&memory),
            Arc::clone(&relevance),
        ));
        let analyzer = MemoryAnalyzer::new(config.curation.clone(), memory, relevance);
        let reporter = StatusReporter::new(
            config.scheduler.clone(),
            Arc::clone(&state),
            Arc::clone(&queue),
        );
        Self {
            config,
            state,
            queue,
            pipeline,
            analyzer,
            reporter,
            background: Mutex::new(None),
            shut_down: Mutex::new(false),
        }
    }

    /// Start the background tasks. A disabled scheduler starts nothing;
    /// manual curation via [`curate_now`](Self::curate_now) still works.
    pub async fn start(&self) -> Result<()> {
        if !self.config.scheduler.enabled {
            info!("curation scheduler disabled, background tasks not started");
            return Ok(());
        }
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Ok(());
        }

        let (producer_stop, producer_rx) = watch::channel(false);
        let (worker_stop, worker_rx) = watch::channel(false);

        let monitor = ThresholdMonitor::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
        );
        let (monitor_handle, monitor_join) = monitor.spawn(producer_rx.clone());

        let periodic = PeriodicTrigger::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
        )
        .spawn(producer_rx);

        let workers = WorkerPool::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
            Arc::clone(&self.pipeline),
        )
        .spawn(worker_rx);

        info!(
            workers = self.config.scheduler.worker_count,
            threshold = self.config.scheduler.auto_curate_threshold,
            interval_seconds = self.config.scheduler.periodic_interval_seconds,
            "curation scheduler started"
        );

        *background = Some(BackgroundTasks {
            monitor_handle,
            monitor: monitor_join,
            periodic,
            workers,
            producer_stop,
            worker_stop,
        });
        Ok(())
    }

    /// Graceful shutdown: stop the producers first so no new tasks
    /// arrive, then stop the workers. A task already dequeued finishes
    /// its run before the worker exits.
    pub async fn shutdown(&self) {
        *self.shut_down.lock().await = true;
        let Some(tasks) = self.background.lock().await.take() else {
            return;
        };

        info!("curation scheduler shutting down");
        tasks.producer_stop.send(true).ok();
        tasks.monitor.await.ok();
        tasks.periodic.await.ok();

        tasks.worker_stop.send(true).ok();
        futures::future::join_all(tasks.workers).await;
        info!("curation scheduler stopped");
    }

    /// Report one memory insertion for `user_id`. Cheap and non-blocking
    /// on the curation side; safe to call from the ingestion hot path.
    pub async fn notify_memory_added(&self, user_id: &str) {
        if let Some(tasks) = self.background.lock().await.as_ref() {
            tasks.monitor_handle.notify_memory_added(user_id);
        }
    }

    /// Record a user query so reranking can score against recent intent.
    pub async fn note_query(&self, user_id: &str, query: &str) {
        match self.background.lock().await.as_ref() {
            Some(tasks) => tasks.monitor_handle.note_query(user_id, query),
            // With the scheduler disabled, manual runs still want context.
            None => self.state.record_query(user_id, query.to_string()).await,
        }
    }

    /// Run curation for one user immediately, bypassing the queue. The
    /// per-user exclusion still applies: a run already in flight makes
    /// this fail fast instead of waiting.
    pub async fn curate_now(&self, user_id: &str, kind: &str) -> Result<CurationRunResult> {
        if *self.shut_down.lock().await {
            return Err(CuratorError::ShuttingDown);
        }
        let kind = TaskKind::parse(kind)?;

        if !self.state.try_begin_run(user_id).await {
            return Err(CuratorError::AlreadyRunning {
                user_id: user_id.to_string(),
            });
        }

        let context = self.state.query_context(user_id).await;
        let result = self.pipeline.run(user_id, kind, &context).await;
        self.state.finish_run(user_id, result.is_ok()).await;
        result
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.background.lock().await.is_some();
        self.reporter.report(running).await
    }

    /// Read-only report over one user's working memory: duplicate
    /// groups, quality and length distributions, and recommendations.
    /// Available regardless of scheduler state and never mutates
    /// anything.
    pub async fn analyze_memory(&self, user_id: &str) -> Result<MemoryAnalysis> {
        self.analyzer.analyze(user_id).await
    }
}
