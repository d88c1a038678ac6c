use std::{future::Future, time::Duration};

use crate::{archive::ColdStoreError, leases::LeaseError, records::RecordStoreError};

/// Store errors that can represent an expired call timeout.
pub(crate) trait TimeoutError {
    fn timed_out(after: Duration) -> Self;
}

impl TimeoutError for RecordStoreError {
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl TimeoutError for ColdStoreError {
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl TimeoutError for LeaseError {
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Run a store call, failing with the store's timeout error once `limit`
/// elapses. The pending call is dropped on expiry.
pub(crate) async fn with_timeout<T, E, F>(limit: Duration, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: TimeoutError,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out(limit)),
    }
}
