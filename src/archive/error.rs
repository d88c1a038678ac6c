use thiserror::Error;

/// Errors that can occur during cold archive store operations.
#[derive(Debug, Error)]
pub enum ColdStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Cold store unavailable: {0}")]
    Unavailable(String),

    #[error("Cold store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ColdStoreResult<T> = Result<T, ColdStoreError>;
