pub mod config;
pub mod memory;
pub mod relevance;
pub mod scheduler;

pub use config::Config;
pub use relevance::{EmbeddingRelevanceScorer, RelevanceProvider};

// Re-export memory types for convenience
pub use memory::{
    error::{CuratorError, Result},
    CurationPipeline, CurationRunResult, InMemoryWorkingMemory, MemoryAnalysis, MemoryAnalyzer,
    MemoryItem, SnapshotStats, StageReport, WorkingMemoryProvider,
};

// Re-export scheduler types
pub use scheduler::{
    CurationScheduler, CurationTask, SchedulerStatus, TaskKind, TaskOrigin, TaskQueue,
};
