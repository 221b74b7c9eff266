//! The three-stage curation pipeline.
//!
//! A run borrows a snapshot of one user's working memory, applies the
//! stages selected by the task kind, and issues a single `replace` back
//! to the provider only if every stage succeeded. Failures
//! and stage timeouts leave the stored memory untouched; there are no
//! partial updates.
//!
//! Deduplication is O(n²) in the snapshot size. That is deliberate: the
//! working-memory cap keeps n small (default 20), and pairwise
//! comparison against a live relevance provider is simpler and more
//! accurate than maintaining an index for lists this short.

use super::error::{CuratorError, Result};
use super::models::{CurationRunResult, MemoryItem, SnapshotStats, StageReport};
use super::provider::WorkingMemoryProvider;
use crate::config::CurationConfig;
use crate::relevance::RelevanceProvider;
use crate::scheduler::task::TaskKind;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub struct CurationPipeline {
    config: CurationConfig,
    memory: Arc<dyn WorkingMemoryProvider>,
    relevance: Arc<dyn RelevanceProvider>,
}

impl CurationPipeline {
    pub fn new(
        config: CurationConfig,
        memory: Arc<dyn WorkingMemoryProvider>,
        relevance: Arc<dyn RelevanceProvider>,
    ) -> Self {
        Self {
            config,
            memory,
            relevance,
        }
    }

    /// Run the stages selected by `kind` for one user and write back the
    /// result. `query_context` is the user's recent queries, newest last.
    #[instrument(skip(self, query_context), fields(kind = %kind))]
    pub async fn run(
        &self,
        user_id: &str,
        kind: TaskKind,
        query_context: &[String],
    ) -> Result<CurationRunResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let snapshot = self.memory.fetch(user_id).await?;
        let before_stats = SnapshotStats::of(&snapshot);

        // Empty working memory is a completed no-op, not an error.
        if snapshot.is_empty() {
            debug!(user_id, "working memory empty, nothing to curate");
            return Ok(CurationRunResult {
                run_id,
                user_id: user_id.to_string(),
                kind: kind.as_str().to_string(),
                started_at,
                completed_at: Utc::now(),
                duration_seconds: start.elapsed().as_secs_f64(),
                before_stats,
                after_stats: before_stats,
                stages: Vec::new(),
                replaced: false,
            });
        }

        let mut items = snapshot;
        let mut stages = Vec::new();

        match kind {
            TaskKind::Full => {
                let (out, report) = self.deduplicate(items).await?;
                items = out;
                stages.push(report);
                let (out, report) = self.quality_filter(items);
                items = out;
                stages.push(report);
                let (out, report) = self.rerank(items, query_context).await?;
                items = out;
                stages.push(report);
            }
            TaskKind::Dedup => {
                let (out, report) = self.deduplicate(items).await?;
                items = out;
                stages.push(report);
            }
            TaskKind::Quality => {
                let (out, report) = self.quality_filter(items);
                items = out;
                stages.push(report);
            }
            TaskKind::Rerank => {
                let (out, report) = self.rerank(items, query_context).await?;
                items = out;
                stages.push(report);
            }
        }

        let after_stats = SnapshotStats::of(&items);
        self.memory.replace(user_id, items).await?;

        let completed_at = Utc::now();
        let result = CurationRunResult {
            run_id,
            user_id: user_id.to_string(),
            kind: kind.as_str().to_string(),
            started_at,
            completed_at,
            duration_seconds: start.elapsed().as_secs_f64(),
            before_stats,
            after_stats,
            stages,
            replaced: true,
        };

        info!(
            user_id,
            run_id = %result.run_id,
            before = before_stats.item_count,
            after = after_stats.item_count,
            duration_seconds = result.duration_seconds,
            "curation run completed"
        );

        Ok(result)
    }

    /// Drop near-duplicate memories, keeping the later-inserted of each
    /// duplicate pair. Idempotent: a deduplicated list passes through
    /// unchanged.
    async fn deduplicate(&self, items: Vec<MemoryItem>) -> Result<(Vec<MemoryItem>, StageReport)> {
        let timeout = Duration::from_secs(self.config.stage_timeout_seconds);
        let threshold = self.config.similarity_threshold;
        let relevance = Arc::clone(&self.relevance);

        let input_count = items.len();
        let start = Instant::now();

        let survivors = stage_timeout("dedup", timeout, async move {
            let n = items.len();
            let mut keep = vec![true; n];
            for i in 0..n {
                if !keep[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if !keep[j] {
                        continue;
                    }
                    let sim = relevance.similarity(&items[i].text, &items[j].text).await?;
                    if sim >= threshold {
                        // Tie-break by insertion time: the earlier item is
                        // presumed superseded by the later one.
                        if items[i].inserted_at <= items[j].inserted_at {
                            keep[i] = false;
                            break;
                        } else {
                            keep[j] = false;
                        }
                    }
                }
            }
            let survivors: Vec<MemoryItem> = items
                .into_iter()
                .zip(keep)
                .filter_map(|(item, kept)| kept.then_some(item))
                .collect();
            Ok(survivors)
        })
        .await?;

        let report = StageReport {
            stage: "dedup".to_string(),
            input_count,
            output_count: survivors.len(),
            removed_count: input_count - survivors.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            skipped: None,
        };
        debug!(removed = report.removed_count, "deduplication finished");
        Ok((survivors, report))
    }

    /// Drop memories too short to carry retrievable meaning.
    fn quality_filter(&self, items: Vec<MemoryItem>) -> (Vec<MemoryItem>, StageReport) {
        let start = Instant::now();
        let input_count = items.len();
        let min_length = self.config.min_memory_length;

        let survivors: Vec<MemoryItem> = items
            .into_iter()
            .filter(|item| item.len_chars() >= min_length)
            .collect();

        let report = StageReport {
            stage: "quality".to_string(),
            input_count,
            output_count: survivors.len(),
            removed_count: input_count - survivors.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            skipped: None,
        };
        (survivors, report)
    }

    /// Reorder by relevance to the user's recent queries and keep the
    /// top-K. Without query context relevance cannot be computed, so the
    /// stage passes the list through untouched.
    async fn rerank(
        &self,
        items: Vec<MemoryItem>,
        query_context: &[String],
    ) -> Result<(Vec<MemoryItem>, StageReport)> {
        let start = Instant::now();
        let input_count = items.len();

        if query_context.is_empty() {
            let report = StageReport {
                stage: "rerank".to_string(),
                input_count,
                output_count: input_count,
                removed_count: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                skipped: Some("no recent queries".to_string()),
            };
            return Ok((items, report));
        }

        let timeout = Duration::from_secs(self.config.stage_timeout_seconds);
        let cap = self.config.working_memory_cap;
        let relevance = Arc::clone(&self.relevance);
        let context = query_context.to_vec();

        let ranked = stage_timeout("rerank", timeout, async move {
            let mut scored = Vec::with_capacity(items.len());
            for item in items {
                let score = relevance.score_relevance(&item.text, &context).await?;
                scored.push((score, item));
            }
            // Stable sort: equal scores keep insertion order
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(cap);
            Ok(scored.into_iter().map(|(_, item)| item).collect::<Vec<_>>())
        })
        .await?;

        let report = StageReport {
            stage: "rerank".to_string(),
            input_count,
            output_count: ranked.len(),
            removed_count: input_count - ranked.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            skipped: None,
        };
        Ok((ranked, report))
    }
}

/// Bound a stage's provider calls; a timeout fails the whole run so no
/// partial update is ever written back.
pub(crate) async fn stage_timeout<T, F>(stage: &str, duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(CuratorError::ProviderTimeout {
            stage: stage.to_string(),
            seconds: duration.as_secs(),
        }),
    }
}
