use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    error::ColdStoreResult,
    traits::{Blob, BlobMetadata, ColdStore, ObjectInfo},
};
use crate::models::{Page, PageRequest, paginate_sorted};

#[derive(Debug, Clone)]
struct StoredObject {
    payload: Vec<u8>,
    metadata: BlobMetadata,
    created_at: DateTime<Utc>,
}

/// In-memory cold store, ordered by key.
#[derive(Default)]
pub struct MemoryColdStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit creation time.
    pub async fn insert_with_created_at(
        &self,
        key: impl Into<String>,
        payload: Vec<u8>,
        metadata: BlobMetadata,
        created_at: DateTime<Utc>,
    ) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                payload,
                metadata,
                created_at,
            },
        );
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ColdStore for MemoryColdStore {
    async fn write_blob(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> ColdStoreResult<()> {
        self.insert_with_created_at(key, payload, metadata.clone(), Utc::now())
            .await;
        Ok(())
    }

    async fn read_blob(&self, key: &str) -> ColdStoreResult<Option<Blob>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|obj| Blob {
            key: key.to_string(),
            payload: obj.payload.clone(),
            metadata: Some(obj.metadata.clone()),
            created_at: obj.created_at,
        }))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        page: PageRequest,
    ) -> ColdStoreResult<Page<ObjectInfo>> {
        let objects = self.objects.read().await;
        let matching = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                created_at: obj.created_at,
                size: obj.payload.len() as u64,
            });
        Ok(paginate_sorted(matching, |info| info.key.as_str(), &page))
    }

    async fn delete_object(&self, key: &str) -> ColdStoreResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
