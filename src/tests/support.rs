//! Store wrappers that inject failures into otherwise healthy backends.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    archive::{Blob, BlobMetadata, ColdStore, ColdStoreError, ColdStoreResult, ObjectInfo},
    models::{ConversationId, Message, MessageId, MessageRecord, Page, PageRequest},
    records::{RecordStore, RecordStoreError, RecordStoreResult},
};

/// Record store whose batch deletes fail for chosen conversations.
pub struct FaultyRecordStore {
    inner: Arc<dyn RecordStore>,
    failing_deletes: Mutex<HashSet<ConversationId>>,
    pub delete_calls: AtomicU64,
}

impl FaultyRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            failing_deletes: Mutex::new(HashSet::new()),
            delete_calls: AtomicU64::new(0),
        }
    }

    pub fn fail_deletes_for(&self, conversation_id: impl Into<ConversationId>) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(conversation_id.into());
    }

    pub fn heal(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }
}

#[async_trait]
impl RecordStore for FaultyRecordStore {
    async fn list_conversations(
        &self,
        page: PageRequest,
    ) -> RecordStoreResult<Page<ConversationId>> {
        self.inner.list_conversations(page).await
    }

    async fn query_old_messages(
        &self,
        conversation_id: &ConversationId,
        before: DateTime<Utc>,
    ) -> RecordStoreResult<Vec<MessageRecord>> {
        self.inner.query_old_messages(conversation_id, before).await
    }

    async fn delete_messages_atomic(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> RecordStoreResult<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_deletes
            .lock()
            .unwrap()
            .contains(conversation_id)
        {
            return Err(RecordStoreError::Unavailable(
                "injected delete failure".into(),
            ));
        }
        self.inner.delete_messages_atomic(conversation_id, ids).await
    }

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> RecordStoreResult<Vec<MessageId>> {
        self.inner.append_messages(conversation_id, messages).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

/// Cold store that can fail writes or deletes, hang on chosen keys, or hand
/// back corrupted payloads on read.
pub struct FaultyColdStore {
    inner: Arc<dyn ColdStore>,
    fail_writes: AtomicBool,
    corrupt_reads_after_write: AtomicBool,
    failing_deletes: Mutex<HashSet<String>>,
    hanging_prefixes: Mutex<Vec<String>>,
    written: Mutex<HashSet<String>>,
    pub write_calls: AtomicU64,
}

impl FaultyColdStore {
    pub fn new(inner: Arc<dyn ColdStore>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            corrupt_reads_after_write: AtomicBool::new(false),
            failing_deletes: Mutex::new(HashSet::new()),
            hanging_prefixes: Mutex::new(Vec::new()),
            written: Mutex::new(HashSet::new()),
            write_calls: AtomicU64::new(0),
        }
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Reads of keys written through this wrapper return a truncated payload.
    pub fn corrupt_reads_after_write(&self) {
        self.corrupt_reads_after_write.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete_of(&self, key: impl Into<String>) {
        self.failing_deletes.lock().unwrap().insert(key.into());
    }

    /// Writes and deletes of keys under `prefix` never complete.
    pub fn hang_under(&self, prefix: impl Into<String>) {
        self.hanging_prefixes.lock().unwrap().push(prefix.into());
    }

    async fn hang_if_chosen(&self, key: &str) {
        let hangs = self
            .hanging_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()));
        if hangs {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ColdStore for FaultyColdStore {
    async fn write_blob(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> ColdStoreResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ColdStoreError::Unavailable("injected write failure".into()));
        }
        self.hang_if_chosen(key).await;
        self.inner.write_blob(key, payload, metadata).await?;
        self.written.lock().unwrap().insert(key.to_string());
        Ok(())
    }

    async fn read_blob(&self, key: &str) -> ColdStoreResult<Option<Blob>> {
        let blob = self.inner.read_blob(key).await?;
        let corrupt = self.corrupt_reads_after_write.load(Ordering::SeqCst)
            && self.written.lock().unwrap().contains(key);
        Ok(blob.map(|mut blob| {
            if corrupt {
                blob.payload.truncate(blob.payload.len() / 2);
            }
            blob
        }))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        page: PageRequest,
    ) -> ColdStoreResult<Page<ObjectInfo>> {
        self.inner.list_objects(prefix, page).await
    }

    async fn delete_object(&self, key: &str) -> ColdStoreResult<()> {
        self.hang_if_chosen(key).await;
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(ColdStoreError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_object(key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
