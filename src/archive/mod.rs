//! Cold archive storage for chat transcripts.
//!
//! Archive blobs are JSON arrays of [`ArchivedMessage`](crate::models::ArchivedMessage)
//! stored under `{prefix}/{conversationId}/{YYYY}-{MM}.json`. Backends:
//!
//! - **Memory**: for tests and local development
//! - **Filesystem**: blobs on local disk with metadata sidecars
//! - **S3**: any S3-compatible object store (`s3-storage` feature)
//!
//! The backend is configured via `[archive]` in the config.

mod error;
mod filesystem;
mod keys;
mod memory;
#[cfg(feature = "s3-storage")]
mod s3;
mod traits;

use std::sync::Arc;

pub use error::{ColdStoreError, ColdStoreResult};
pub use filesystem::FilesystemColdStore;
pub use keys::{
    Bucket, DEFAULT_ARCHIVE_PREFIX, archive_key, conversation_prefix, listing_prefix,
    parse_archive_key,
};
pub use memory::MemoryColdStore;
#[cfg(feature = "s3-storage")]
pub use s3::S3ColdStore;
pub use traits::{BLOB_CONTENT_TYPE, Blob, BlobMetadata, ColdStore, ObjectInfo, payload_digest};

use tracing::info;

use crate::config::{ColdStoreBackend, ColdStoreConfig};

/// Create a cold store backend from configuration.
pub async fn create_cold_store(config: &ColdStoreConfig) -> ColdStoreResult<Arc<dyn ColdStore>> {
    match config.backend {
        ColdStoreBackend::Memory => {
            info!("Using in-memory cold store backend");
            Ok(Arc::new(MemoryColdStore::new()))
        }
        ColdStoreBackend::Filesystem => {
            let fs_config = config.filesystem.clone().ok_or_else(|| {
                ColdStoreError::Config(
                    "Filesystem backend requires [archive.filesystem] config".to_string(),
                )
            })?;
            info!(path = %fs_config.path, "Using filesystem cold store backend");
            Ok(Arc::new(FilesystemColdStore::new(fs_config)?))
        }
        #[cfg(feature = "s3-storage")]
        ColdStoreBackend::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                ColdStoreError::Config("S3 backend requires [archive.s3] config".to_string())
            })?;
            info!(bucket = %s3_config.bucket, "Using S3 cold store backend");
            Ok(Arc::new(S3ColdStore::new(s3_config).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        ColdStoreBackend::S3 => Err(ColdStoreError::Config(
            "S3 cold store backend requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}
