//! Curation task definitions.
//!
//! Tasks are immutable once enqueued. Which pipeline stages run is a
//! closed enum rather than a string so stage selection is an exhaustive
//! `match`; where the task came from is tracked separately, since origin
//! decides priority but not behavior.

use crate::memory::error::{CuratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest urgency: a user crossed the insertion-volume threshold.
pub const PRIORITY_THRESHOLD: u8 = 0;
/// Safety-net sweeps rank below threshold-triggered work.
pub const PRIORITY_PERIODIC: u8 = 1;

/// Which pipeline stages a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Deduplicate, then quality filter, then rerank
    Full,
    Dedup,
    Quality,
    Rerank,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Full => "full",
            TaskKind::Dedup => "dedup",
            TaskKind::Quality => "quality",
            TaskKind::Rerank => "rerank",
        }
    }

    /// Parse a kind from its wire name, as used by the manual trigger.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(TaskKind::Full),
            "dedup" => Ok(TaskKind::Dedup),
            "quality" => Ok(TaskKind::Quality),
            "rerank" => Ok(TaskKind::Rerank),
            other => Err(CuratorError::InvalidTaskKind(other.to_string())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a task to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOrigin {
    ThresholdTriggered,
    Periodic,
    Manual,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOrigin::ThresholdTriggered => "threshold_triggered",
            TaskOrigin::Periodic => "periodic",
            TaskOrigin::Manual => "manual",
        }
    }
}

/// A pending curation request for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationTask {
    pub user_id: String,
    pub kind: TaskKind,
    pub origin: TaskOrigin,
    /// Lower value dequeues first
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may be dequeued; `None` means immediately
    /// eligible. Workers set this when deferring a task whose user is
    /// busy.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CurationTask {
    pub fn threshold_triggered(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: TaskKind::Full,
            origin: TaskOrigin::ThresholdTriggered,
            priority: PRIORITY_THRESHOLD,
            created_at: Utc::now(),
            scheduled_at: None,
        }
    }

    pub fn periodic(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: TaskKind::Full,
            origin: TaskOrigin::Periodic,
            priority: PRIORITY_PERIODIC,
            created_at: Utc::now(),
            scheduled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [TaskKind::Full, TaskKind::Dedup, TaskKind::Quality, TaskKind::Rerank] {
            assert_eq!(TaskKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = TaskKind::parse("defragment").unwrap_err();
        assert!(matches!(err, CuratorError::InvalidTaskKind(_)));
    }

    #[test]
    fn test_threshold_outranks_periodic() {
        let urgent = CurationTask::threshold_triggered("u1");
        let sweep = CurationTask::periodic("u1");
        assert!(urgent.priority < sweep.priority);
        assert_eq!(urgent.origin.as_str(), "threshold_triggered");
        assert_eq!(sweep.origin.as_str(), "periodic");
    }
}
