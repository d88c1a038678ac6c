mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{LeaseError, LeaseResult};
pub use memory::MemoryLeaseStore;
#[cfg(feature = "redis")]
pub use redis::RedisLeaseStore;
pub use traits::{LeaseStore, conversation_lease_key, job_lease_key, new_holder_id};

use crate::config::LeaseStoreConfig;

/// Create a lease store from configuration.
pub fn create_lease_store(config: &LeaseStoreConfig) -> LeaseResult<Arc<dyn LeaseStore>> {
    let store: Arc<dyn LeaseStore> = match config {
        LeaseStoreConfig::Memory => Arc::new(MemoryLeaseStore::new()),

        #[cfg(feature = "redis")]
        LeaseStoreConfig::Redis(cfg) => Arc::new(RedisLeaseStore::new(cfg)?),
        #[cfg(not(feature = "redis"))]
        LeaseStoreConfig::Redis(_) => {
            return Err(LeaseError::Internal(
                "Redis lease store configured but the 'redis' feature is not enabled. \
                Rebuild with: cargo build --features redis"
                    .to_string(),
            ));
        }
    };

    tracing::debug!(backend = store.backend_name(), "Lease store created");
    Ok(store)
}
