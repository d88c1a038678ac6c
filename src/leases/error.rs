use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Lease store unavailable: {0}")]
    Unavailable(String),

    #[error("Lease store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LeaseResult<T> = Result<T, LeaseError>;
