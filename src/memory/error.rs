use thiserror::Error;

#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider call timed out in {stage} stage after {seconds}s")]
    ProviderTimeout { stage: String, seconds: u64 },

    #[error("Invalid task kind: {0}")]
    InvalidTaskKind(String),

    #[error("Curation already running for user {user_id}")]
    AlreadyRunning { user_id: String },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CuratorError>;
