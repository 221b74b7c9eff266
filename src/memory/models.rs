//! Core data types for working-memory curation.
//!
//! A `MemoryItem` is one entry in a user's bounded working memory. The
//! scheduler only ever borrows a snapshot of these items for the duration
//! of a single pipeline run; ownership stays with the
//! `WorkingMemoryProvider`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One contextual fact in a user's working memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryItem {
    /// The memory text itself
    pub text: String,

    /// When the item was inserted into working memory
    pub inserted_at: DateTime<Utc>,

    /// Precomputed embedding, if the provider supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Precomputed quality score in [0,1], if available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
}

impl MemoryItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            inserted_at: Utc::now(),
            embedding: None,
            quality: None,
        }
    }

    pub fn with_inserted_at(mut self, inserted_at: DateTime<Utc>) -> Self {
        self.inserted_at = inserted_at;
        self
    }

    /// Text length in characters, the unit the quality filter operates on.
    pub fn len_chars(&self) -> usize {
        self.text.chars().count()
    }
}

/// Aggregate statistics over a working-memory snapshot, captured before
/// and after a curation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SnapshotStats {
    pub item_count: usize,
    pub total_chars: usize,
    pub average_chars: f64,
}

impl SnapshotStats {
    pub fn of(items: &[MemoryItem]) -> Self {
        let total_chars: usize = items.iter().map(MemoryItem::len_chars).sum();
        let average_chars = if items.is_empty() {
            0.0
        } else {
            total_chars as f64 / items.len() as f64
        };
        Self {
            item_count: items.len(),
            total_chars,
            average_chars,
        }
    }
}

/// Per-stage report within a curation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub input_count: usize,
    pub output_count: usize,
    pub removed_count: usize,
    pub duration_ms: u64,
    /// Present only when the stage was skipped (e.g. rerank without
    /// query context)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// Summary of one complete curation run for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationRunResult {
    pub run_id: Uuid,
    pub user_id: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub before_stats: SnapshotStats,
    pub after_stats: SnapshotStats,
    pub stages: Vec<StageReport>,
    /// Whether a replace call was issued (false for empty-memory no-ops)
    pub replaced: bool,
}
