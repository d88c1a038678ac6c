use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    error::RecordStoreResult,
    traits::{RecordStore, new_message_id},
};
use crate::models::{
    ConversationId, Message, MessageId, MessageRecord, Page, PageRequest, paginate_sorted,
};

/// In-memory record store.
///
/// Suitable for local development and tests. Conversations are kept in key
/// order so pagination is stable; data is lost on restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    conversations: RwLock<BTreeMap<ConversationId, BTreeMap<MessageId, MessageRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw record as-is, bypassing message validation.
    pub async fn insert_record(&self, conversation_id: &ConversationId, record: MessageRecord) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// All records of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &ConversationId) -> Vec<MessageRecord> {
        let conversations = self.conversations.read().await;
        let mut records: Vec<_> = conversations
            .get(conversation_id)
            .map(|msgs| msgs.values().cloned().collect())
            .unwrap_or_default();
        sort_records(&mut records);
        records
    }

    /// Total number of live messages across all conversations.
    pub async fn message_count(&self) -> usize {
        let conversations = self.conversations.read().await;
        conversations.values().map(BTreeMap::len).sum()
    }
}

fn sort_records(records: &mut [MessageRecord]) {
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_conversations(
        &self,
        page: PageRequest,
    ) -> RecordStoreResult<Page<ConversationId>> {
        let conversations = self.conversations.read().await;
        Ok(paginate_sorted(
            conversations.keys().cloned(),
            |id| id.as_str(),
            &page,
        ))
    }

    async fn query_old_messages(
        &self,
        conversation_id: &ConversationId,
        before: DateTime<Utc>,
    ) -> RecordStoreResult<Vec<MessageRecord>> {
        let conversations = self.conversations.read().await;
        let mut records: Vec<_> = conversations
            .get(conversation_id)
            .map(|msgs| {
                msgs.values()
                    .filter(|r| r.timestamp < before)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_records(&mut records);
        Ok(records)
    }

    async fn delete_messages_atomic(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> RecordStoreResult<u64> {
        // A single write guard makes the batch all-or-nothing for readers.
        let mut conversations = self.conversations.write().await;
        let Some(messages) = conversations.get_mut(conversation_id) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for id in ids {
            if messages.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> RecordStoreResult<Vec<MessageId>> {
        let mut conversations = self.conversations.write().await;
        let collection = conversations.entry(conversation_id.clone()).or_default();

        let ids = messages
            .iter()
            .map(|message| {
                let id = new_message_id();
                collection.insert(id.clone(), MessageRecord::new(id.clone(), message));
                id
            })
            .collect();
        Ok(ids)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
