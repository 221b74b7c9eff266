//! Working-memory model, storage seam, the curation pipeline, and the
//! read-only analysis companion.

pub mod analysis;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod provider;

pub use analysis::{MemoryAnalysis, MemoryAnalyzer};
pub use error::{CuratorError, Result};
pub use models::{CurationRunResult, MemoryItem, SnapshotStats, StageReport};
pub use pipeline::CurationPipeline;
pub use provider::{InMemoryWorkingMemory, WorkingMemoryProvider};
