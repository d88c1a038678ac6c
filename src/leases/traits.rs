use std::time::Duration;

use async_trait::async_trait;

use super::error::LeaseResult;

/// Time-bounded exclusive claims on named resources.
///
/// A lease is held by an opaque holder id until it is released by that same
/// holder or its ttl elapses, whichever comes first.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim `key` for `holder` unless someone else holds an unexpired lease.
    ///
    /// Returns `true` if the lease was acquired.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> LeaseResult<bool>;

    /// Release `key` if it is still held by `holder`.
    ///
    /// Returns `false` if the lease had expired or belongs to someone else.
    async fn release(&self, key: &str, holder: &str) -> LeaseResult<bool>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Generate a holder id unique to one job run.
pub fn new_holder_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lease key guarding archival of one conversation.
pub fn conversation_lease_key(conversation_id: &str) -> String {
    format!("archive:conversation:{}", conversation_id)
}

/// Lease key guarding a whole job.
pub fn job_lease_key(job: &str) -> String {
    format!("job:{}", job)
}
