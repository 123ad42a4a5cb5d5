//! Error types for the orchestration engine

use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum OrchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    DbError(String),

    /// Rejected before any job row exists
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A runner failed for one target
    #[error("Runner failure: {0}")]
    RunnerFailure(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Staging or decryption failed before the container CLI ran
    #[error("Staging failure: {0}")]
    StagingFailure(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchError {
    /// Stable machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            OrchError::InvalidInput(_) => "invalid_input",
            OrchError::NotFound(_) => "not_found",
            OrchError::RunnerFailure(_) => "runner_failure",
            OrchError::StoreUnavailable(_) => "store_unavailable",
            OrchError::StagingFailure(_) => "staging_failure",
            OrchError::Timeout(_) => "timeout",
            _ => "internal",
        }
    }
}

impl From<sqlx::Error> for OrchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrchError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                OrchError::StoreUnavailable(err.to_string())
            }
            sqlx::Error::Io(e) => OrchError::StoreUnavailable(e.to_string()),
            other => OrchError::DbError(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for OrchError {
    fn from(err: anyhow::Error) -> Self {
        OrchError::Internal(err.to_string())
    }
}
