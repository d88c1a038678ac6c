mod error;
mod memory;
#[cfg(feature = "database-sqlite")]
mod sqlite;
mod traits;

use std::sync::Arc;

pub use error::{RecordStoreError, RecordStoreResult};
pub use memory::MemoryRecordStore;
#[cfg(feature = "database-sqlite")]
pub use sqlite::SqliteRecordStore;
pub use traits::{RecordStore, new_message_id};

use crate::config::RecordStoreConfig;

/// Create the live record store from configuration.
pub async fn create_record_store(
    config: &RecordStoreConfig,
) -> RecordStoreResult<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match config {
        RecordStoreConfig::Memory => Arc::new(MemoryRecordStore::new()),

        #[cfg(feature = "database-sqlite")]
        RecordStoreConfig::Sqlite(cfg) => Arc::new(SqliteRecordStore::connect(cfg).await?),
        #[cfg(not(feature = "database-sqlite"))]
        RecordStoreConfig::Sqlite(_) => {
            return Err(RecordStoreError::Internal(
                "SQLite record store configured but the 'database-sqlite' feature is not enabled. \
                Rebuild with: cargo build --features database-sqlite"
                    .to_string(),
            ));
        }
    };

    tracing::debug!(backend = store.backend_name(), "Record store created");
    Ok(store)
}
