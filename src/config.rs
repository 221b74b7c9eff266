use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Background scheduler settings
    pub scheduler: SchedulerConfig,

    /// Pipeline thresholds and caps
    pub curation: CurationConfig,

    /// Relevance/embedding provider settings
    pub relevance: RelevanceConfig,

    /// Operational settings
    pub operational: OperationalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the background scheduler (manual triggers still work when off)
    pub enabled: bool,

    /// Insertions per user before a threshold-triggered curation
    pub auto_curate_threshold: u64,

    /// Periodic safety-net sweep interval in seconds
    pub periodic_interval_seconds: u64,

    /// Grace period before a never-curated user is swept, in seconds
    pub periodic_grace_seconds: u64,

    /// Number of curation workers
    pub worker_count: usize,

    /// Pending task queue capacity
    pub queue_capacity: usize,

    /// Capacity of the fire-and-forget notification channel
    pub notify_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationConfig {
    /// Cosine/overlap similarity above which two memories are duplicates
    pub similarity_threshold: f32,

    /// Minimum memory length in characters to survive the quality filter
    pub min_memory_length: usize,

    /// Working-memory cap, also the rerank top-K
    pub working_memory_cap: usize,

    /// Recent queries kept per user as rerank context
    pub context_window_size: usize,

    /// Timeout applied to each pipeline stage's provider calls, seconds
    pub stage_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Relevance provider ("ollama" or "mock")
    pub provider: String,

    /// Embedding model name
    pub model: String,

    /// Base URL for the embedding service
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            curation: CurationConfig::default(),
            relevance: RelevanceConfig::default(),
            operational: OperationalConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_curate_threshold: 50,
            periodic_interval_seconds: 3600,
            periodic_grace_seconds: 3600, // one interval before first sweep
            worker_count: 3,
            queue_capacity: 64,
            notify_channel_capacity: 1024,
        }
    }
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            min_memory_length: 10,
            working_memory_cap: 20,
            context_window_size: 5,
            stage_timeout_seconds: 30,
        }
    }
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();

        if let Ok(enabled) = env::var("CURATOR_ENABLED") {
            config.scheduler.enabled = enabled
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid CURATOR_ENABLED: {}", e))?;
        }

        if let Ok(threshold) = env::var("AUTO_CURATE_THRESHOLD") {
            config.scheduler.auto_curate_threshold = threshold
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid AUTO_CURATE_THRESHOLD: {}", e))?;
        }

        if let Ok(interval) = env::var("PERIODIC_INTERVAL_SECONDS") {
            config.scheduler.periodic_interval_seconds = interval
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PERIODIC_INTERVAL_SECONDS: {}", e))?;
        }

        if let Ok(grace) = env::var("PERIODIC_GRACE_SECONDS") {
            config.scheduler.periodic_grace_seconds = grace
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PERIODIC_GRACE_SECONDS: {}", e))?;
        }

        if let Ok(workers) = env::var("WORKER_COUNT") {
            config.scheduler.worker_count = workers
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid WORKER_COUNT: {}", e))?;
        }

        if let Ok(capacity) = env::var("QUEUE_CAPACITY") {
            config.scheduler.queue_capacity = capacity
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid QUEUE_CAPACITY: {}", e))?;
        }

        if let Ok(threshold) = env::var("SIMILARITY_THRESHOLD") {
            config.curation.similarity_threshold = threshold
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid SIMILARITY_THRESHOLD: {}", e))?;
        }

        if let Ok(min_length) = env::var("MIN_MEMORY_LENGTH") {
            config.curation.min_memory_length = min_length
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid MIN_MEMORY_LENGTH: {}", e))?;
        }

        if let Ok(cap) = env::var("WORKING_MEMORY_CAP") {
            config.curation.working_memory_cap = cap
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid WORKING_MEMORY_CAP: {}", e))?;
        }

        if let Ok(window) = env::var("CONTEXT_WINDOW_SIZE") {
            config.curation.context_window_size = window
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid CONTEXT_WINDOW_SIZE: {}", e))?;
        }

        if let Ok(timeout) = env::var("STAGE_TIMEOUT_SECONDS") {
            config.curation.stage_timeout_seconds = timeout
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid STAGE_TIMEOUT_SECONDS: {}", e))?;
        }

        if let Ok(provider) = env::var("RELEVANCE_PROVIDER") {
            config.relevance.provider = provider;
        }

        if let Ok(model) = env::var("RELEVANCE_MODEL") {
            config.relevance.model = model;
        }

        if let Ok(base_url) = env::var("RELEVANCE_BASE_URL") {
            config.relevance.base_url = base_url;
        }

        if let Ok(timeout) = env::var("RELEVANCE_TIMEOUT_SECONDS") {
            config.relevance.timeout_seconds = timeout
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RELEVANCE_TIMEOUT_SECONDS: {}", e))?;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.operational.log_level = level;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.auto_curate_threshold == 0 {
            return Err(anyhow::anyhow!(
                "Auto-curate threshold must be greater than 0"
            ));
        }

        if self.scheduler.worker_count == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }

        if self.scheduler.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Queue capacity must be greater than 0"));
        }

        if self.scheduler.periodic_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "Periodic interval must be greater than 0 seconds"
            ));
        }

        if !(0.0..=1.0).contains(&self.curation.similarity_threshold) {
            return Err(anyhow::anyhow!(
                "Similarity threshold must be between 0.0 and 1.0"
            ));
        }

        if self.curation.working_memory_cap == 0 {
            return Err(anyhow::anyhow!(
                "Working memory cap must be greater than 0"
            ));
        }

        match self.relevance.provider.as_str() {
            "ollama" => {
                if self.relevance.base_url.is_empty() {
                    return Err(anyhow::anyhow!("Base URL is required for Ollama provider"));
                }
                if self.relevance.model.is_empty() {
                    return Err(anyhow::anyhow!("Model is required for Ollama provider"));
                }
            }
            "mock" => {
                // Mock provider for testing - no additional validation needed
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid relevance provider: {}. Must be 'ollama' or 'mock'",
                    self.relevance.provider
                ));
            }
        }

        Ok(())
    }
}
