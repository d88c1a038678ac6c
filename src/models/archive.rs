use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{MalformedMessage, Message, MessageId, MessageRecord, Role};

/// One entry of an archive blob: the original message fields plus the
/// store key it had and the time it was archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    pub archived_at: DateTime<Utc>,
    /// Any other fields present on the stored document, carried verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArchivedMessage {
    pub fn from_record(
        record: &MessageRecord,
        archived_at: DateTime<Utc>,
    ) -> Result<Self, MalformedMessage> {
        let message = Message::from_record(record)?;
        Ok(Self {
            id: record.id.clone(),
            role: message.role,
            content: message.content,
            timestamp: message.timestamp,
            model: message.model,
            usage: message.usage,
            archived_at,
            extra: record.extra_fields(),
        })
    }
}
