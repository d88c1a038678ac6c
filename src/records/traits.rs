use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RecordStoreResult;
use crate::models::{ConversationId, Message, MessageId, MessageRecord, Page, PageRequest};

/// Live message storage, one message collection per conversation.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List known conversations in a stable order, one page at a time.
    async fn list_conversations(&self, page: PageRequest)
    -> RecordStoreResult<Page<ConversationId>>;

    /// Messages of a conversation with `timestamp < before`, oldest first.
    async fn query_old_messages(
        &self,
        conversation_id: &ConversationId,
        before: DateTime<Utc>,
    ) -> RecordStoreResult<Vec<MessageRecord>>;

    /// Delete the given messages in a single all-or-nothing batch.
    ///
    /// Ids that no longer exist are ignored. Returns the number removed.
    async fn delete_messages_atomic(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> RecordStoreResult<u64>;

    /// Append messages to a conversation, assigning each a fresh store key.
    ///
    /// This is the write path used by the chat relay; all messages in one
    /// call are written together.
    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> RecordStoreResult<Vec<MessageId>>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Generate a new store key for a message.
pub fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}
