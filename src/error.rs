//! Analytics Error Types
//!
//! None of these ever reach host code through the public entry points. They
//! exist so internal steps can use `?` and be logged in one place.

/// Top-level analytics errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Tab-scoped or durable storage failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored value for {key} is corrupt")]
    Corrupt { key: String },
}

/// Remote sink failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Sink unavailable")]
    Unavailable,

    #[error("Record rejected: {0}")]
    Rejected(String),
}

/// Mirror reporting failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum MirrorError {
    #[error("Mirror rejected {command}: {reason}")]
    Rejected { command: String, reason: String },
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        tracing::debug!("Analytics database error: {:?}", err);
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => SinkError::Unavailable,
            other => SinkError::Database(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AnalyticsError {
    fn from(err: validator::ValidationErrors) -> Self {
        AnalyticsError::Config(err.to_string())
    }
}
