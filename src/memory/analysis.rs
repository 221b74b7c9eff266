//! Read-only working-memory analysis.
//!
//! Inspection companion to the curation pipeline: reports duplicate
//! groups, quality and length distributions, and improvement
//! recommendations for one user's working memory without modifying it.
//! Lets an operator preview what a curation run would change before
//! triggering one.

use super::error::Result;
use super::models::{MemoryItem, SnapshotStats};
use super::pipeline::stage_timeout;
use super::provider::WorkingMemoryProvider;
use crate::config::CurationConfig;
use crate::relevance::RelevanceProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Deduplication,
    QualityImprovement,
    SizeReduction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub message: String,
}

/// A set of near-duplicate memories. The representative is the item a
/// dedup run would keep, i.e. the latest-inserted member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub representative: String,
    pub members: Vec<String>,
    /// Highest pairwise similarity observed within the group
    pub max_similarity: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityAnalysis {
    pub average_score: f64,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LengthAnalysis {
    pub average_chars: f64,
    pub min_chars: usize,
    pub max_chars: usize,
    pub short_count: usize,
    pub medium_count: usize,
    pub long_count: usize,
}

/// Full read-only report over one user's working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAnalysis {
    pub user_id: String,
    pub analyzed_at: DateTime<Utc>,
    pub stats: SnapshotStats,
    pub quality: QualityAnalysis,
    pub lengths: LengthAnalysis,
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// Items a dedup run would remove
    pub removable_duplicates: usize,
    pub recommendations: Vec<Recommendation>,
}

pub struct MemoryAnalyzer {
    config: CurationConfig,
    memory: Arc<dyn WorkingMemoryProvider>,
    relevance: Arc<dyn RelevanceProvider>,
}

impl MemoryAnalyzer {
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

    /// Analyze one user's working memory. Never writes anything back.
    #[instrument(skip(self))]
    pub async fn analyze(&self, user_id: &str) -> Result<MemoryAnalysis> {
        let snapshot = self.memory.fetch(user_id).await?;
        let stats = SnapshotStats::of(&snapshot);

        let quality = quality_analysis(&snapshot);
        let lengths = length_analysis(&snapshot);
        let duplicate_groups = self.duplicate_groups(&snapshot).await?;
        let removable_duplicates = duplicate_groups
            .iter()
            .map(|g| g.members.len().saturating_sub(1))
            .sum();

        let recommendations = self.recommendations(&stats, &quality, removable_duplicates);

        debug!(
            user_id,
            memories = stats.item_count,
            duplicate_groups = duplicate_groups.len(),
            "working memory analyzed"
        );

        Ok(MemoryAnalysis {
            user_id: user_id.to_string(),
            analyzed_at: Utc::now(),
            stats,
            quality,
            lengths,
            duplicate_groups,
            removable_duplicates,
            recommendations,
        })
    }

    /// Greedy grouping by pairwise similarity at the curation threshold.
    /// Mirrors the dedup stage's pair selection so the preview matches
    /// what a run would actually remove.
    async fn duplicate_groups(&self, items: &[MemoryItem]) -> Result<Vec<DuplicateGroup>> {
        let timeout = Duration::from_secs(self.config.stage_timeout_seconds);
        let threshold = self.config.similarity_threshold;
        let relevance = Arc::clone(&self.relevance);
        let items = items.to_vec();

        stage_timeout("analysis", timeout, async move {
            let n = items.len();
            let mut grouped = vec![false; n];
            let mut groups = Vec::new();

            for i in 0..n {
                if grouped[i] {
                    continue;
                }
                let mut member_idx = vec![i];
                let mut max_similarity: f32 = 0.0;
                for j in (i + 1)..n {
                    if grouped[j] {
                        continue;
                    }
                    let sim = relevance.similarity(&items[i].text, &items[j].text).await?;
                    if sim >= threshold {
                        grouped[j] = true;
                        member_idx.push(j);
                        max_similarity = max_similarity.max(sim);
                    }
                }
                if member_idx.len() < 2 {
                    continue;
                }
                // Dedup keeps the latest-inserted member of a duplicate
                // pair; report that one as the representative.
                let representative = member_idx
                    .iter()
                    .copied()
                    .max_by_key(|&idx| items[idx].inserted_at)
                    .map(|idx| items[idx].text.clone())
                    .unwrap_or_default();
                groups.push(DuplicateGroup {
                    representative,
                    members: member_idx
                        .into_iter()
                        .map(|idx| items[idx].text.clone())
                        .collect(),
                    max_similarity,
                });
            }
            Ok(groups)
        })
        .await
    }

    fn recommendations(
        &self,
        stats: &SnapshotStats,
        quality: &QualityAnalysis,
        removable_duplicates: usize,
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();
        if quality.low_count > 0 {
            out.push(Recommendation {
                kind: RecommendationKind::QualityImprovement,
                priority: RecommendationPriority::High,
                message: format!(
                    "{} low-quality memories could be improved or removed",
                    quality.low_count
                ),
            });
        }
        if removable_duplicates > 0 {
            out.push(Recommendation {
                kind: RecommendationKind::Deduplication,
                priority: RecommendationPriority::Medium,
                message: format!(
                    "{removable_duplicates} near-duplicate memories could be consolidated"
                ),
            });
        }
        if stats.item_count > self.config.working_memory_cap {
            out.push(Recommendation {
                kind: RecommendationKind::SizeReduction,
                priority: RecommendationPriority::Medium,
                message: format!(
                    "working memory holds {} items, above the cap of {}",
                    stats.item_count, self.config.working_memory_cap
                ),
            });
        }
        out
    }
}

/// Heuristic per-item quality when the provider supplied no score:
/// length (saturating at 100 chars) averaged with character diversity
/// (saturating at 20 distinct characters).
fn quality_score(item: &MemoryItem) -> f64 {
    if let Some(quality) = item.quality {
        return f64::from(quality);
    }
    let length_score = (item.len_chars() as f64 / 100.0).min(1.0);
    let unique_chars = item
        .text
        .to_lowercase()
        .chars()
        .collect::<std::collections::HashSet<char>>()
        .len();
    let diversity_score = (unique_chars as f64 / 20.0).min(1.0);
    (length_score + diversity_score) / 2.0
}

fn quality_analysis(items: &[MemoryItem]) -> QualityAnalysis {
    if items.is_empty() {
        return QualityAnalysis::default();
    }
    let mut analysis = QualityAnalysis::default();
    let mut total = 0.0;
    for item in items {
        let score = quality_score(item);
        total += score;
        if score >= 0.7 {
            analysis.high_count += 1;
        } else if score >= 0.4 {
            analysis.medium_count += 1;
        } else {
            analysis.low_count += 1;
        }
    }
    analysis.average_score = total / items.len() as f64;
    analysis
}

fn length_analysis(items: &[MemoryItem]) -> LengthAnalysis {
    if items.is_empty() {
        return LengthAnalysis::default();
    }
    let lengths: Vec<usize> = items.iter().map(MemoryItem::len_chars).collect();
    let total: usize = lengths.iter().sum();
    LengthAnalysis {
        average_chars: total as f64 / lengths.len() as f64,
        min_chars: lengths.iter().copied().min().unwrap_or(0),
        max_chars: lengths.iter().copied().max().unwrap_or(0),
        short_count: lengths.iter().filter(|&&l| l < 20).count(),
        medium_count: lengths.iter().filter(|&&l| (20..100).contains(&l)).count(),
        long_count: lengths.iter().filter(|&&l| l >= 100).count(),
    }
}
