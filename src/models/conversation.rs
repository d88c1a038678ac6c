use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Store-assigned key of a single message record.
pub type MessageId = String;

/// Opaque owner key of a conversation (one conversation per user).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can be embedded as a single segment of an object key.
    pub fn is_key_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\'])
            && !self.0.chars().any(char::is_control)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// A typed chat message as written by the chat relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    /// Token accounting reported by the completion API. Assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// Reasons a stored record cannot be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Fields that [`Message::to_document`] writes and [`Message::from_record`] reads.
const KNOWN_FIELDS: [&str; 4] = ["role", "content", "model", "usage"];

impl Message {
    /// Serialize the message body (everything but the timestamp) as a document.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("role".into(), Value::String(self.role.as_str().into()));
        doc.insert("content".into(), Value::String(self.content.clone()));
        doc.insert("model".into(), Value::String(self.model.clone()));
        if let Some(usage) = &self.usage {
            doc.insert("usage".into(), usage.clone());
        }
        doc
    }

    /// Validate a schemaless record against the message schema.
    pub fn from_record(record: &MessageRecord) -> Result<Self, MalformedMessage> {
        let role = required_str(&record.document, "role")?
            .parse::<Role>()
            .map_err(|reason| MalformedMessage::InvalidField {
                field: "role",
                reason,
            })?;
        let content = required_str(&record.document, "content")?.to_string();
        let model = required_str(&record.document, "model")?.to_string();
        let usage = match record.document.get("usage") {
            None | Some(Value::Null) => None,
            Some(v @ Value::Object(_)) => Some(v.clone()),
            Some(_) => {
                return Err(MalformedMessage::InvalidField {
                    field: "usage",
                    reason: "expected an object".into(),
                });
            }
        };

        Ok(Self {
            role,
            content,
            timestamp: record.timestamp,
            model,
            usage,
        })
    }
}

fn required_str<'a>(
    doc: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, MalformedMessage> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(MalformedMessage::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(MalformedMessage::InvalidField {
            field,
            reason: "expected a string".into(),
        }),
    }
}

/// A message as the record store holds it.
///
/// The timestamp is a first-class column so the store can filter on it; the
/// rest of the message lives in a schemaless document that may be malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub document: Map<String, Value>,
}

impl MessageRecord {
    pub fn new(id: impl Into<MessageId>, message: &Message) -> Self {
        Self {
            id: id.into(),
            timestamp: message.timestamp,
            document: message.to_document(),
        }
    }

    /// Document fields the message schema does not know about.
    pub fn extra_fields(&self) -> Map<String, Value> {
        self.document
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()) && !is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Keys the archive format owns; never copied from a stored document.
fn is_reserved(key: &str) -> bool {
    matches!(key, "id" | "timestamp" | "archivedAt")
}

/// One successful round trip through the chat relay.
///
/// The relay writes the user turn and the assistant reply together, with the
/// same server-assigned timestamp.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub user_content: String,
    pub assistant_content: String,
    pub model: String,
    pub usage: Option<Value>,
}

impl ChatExchange {
    pub fn into_messages(self, timestamp: DateTime<Utc>) -> [Message; 2] {
        [
            Message {
                role: Role::User,
                content: self.user_content,
                timestamp,
                model: self.model.clone(),
                usage: None,
            },
            Message {
                role: Role::Assistant,
                content: self.assistant_content,
                timestamp,
                model: self.model,
                usage: self.usage,
            },
        ]
    }
}
