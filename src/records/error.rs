use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Record store not configured")]
    NotConfigured,

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[cfg(feature = "database-sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;
