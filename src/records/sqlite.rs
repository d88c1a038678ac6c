use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{
    error::{RecordStoreError, RecordStoreResult},
    traits::{RecordStore, new_message_id},
};
use crate::{
    config::SqliteRecordsConfig,
    models::{
        ConversationId, Message, MessageId, MessageRecord, Page, PageRequest, decode_key_cursor,
        encode_key_cursor,
    },
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    timestamp_us INTEGER NOT NULL,
    document TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation_ts
    ON chat_messages (conversation_id, timestamp_us);
"#;

/// SQLite-backed record store.
///
/// Timestamps are stored as microseconds since the epoch so range filters
/// compare numerically.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (or create) the database described by `config` and ensure the schema.
    pub async fn connect(config: &SqliteRecordsConfig) -> RecordStoreResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(config.create_if_missing)
                    .journal_mode(if config.wal_mode {
                        sqlx::sqlite::SqliteJournalMode::Wal
                    } else {
                        sqlx::sqlite::SqliteJournalMode::Delete
                    })
                    .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> RecordStoreResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert a raw record as-is, bypassing message validation.
    pub async fn insert_record(
        &self,
        conversation_id: &ConversationId,
        record: &MessageRecord,
    ) -> RecordStoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO chat_messages (id, conversation_id, timestamp_us, document) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(conversation_id.as_str())
        .bind(record.timestamp.timestamp_micros())
        .bind(serde_json::to_string(&record.document)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    timestamp_us: i64,
    document: String,
}

impl MessageRow {
    fn into_record(self) -> RecordStoreResult<MessageRecord> {
        let timestamp = DateTime::from_timestamp_micros(self.timestamp_us).ok_or_else(|| {
            RecordStoreError::Internal(format!(
                "timestamp out of range for message {}: {}",
                self.id, self.timestamp_us
            ))
        })?;
        // Non-object documents surface as empty and fail message validation later.
        let document = match serde_json::from_str::<serde_json::Value>(&self.document)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(MessageRecord {
            id: self.id,
            timestamp,
            document,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list_conversations(
        &self,
        page: PageRequest,
    ) -> RecordStoreResult<Page<ConversationId>> {
        let limit = page.limit.max(1);
        let after = match &page.cursor {
            Some(cursor) => Some(
                decode_key_cursor(cursor)
                    .ok_or_else(|| RecordStoreError::InvalidCursor(cursor.clone()))?,
            ),
            None => None,
        };

        // Fetch one extra row to learn whether another page exists.
        let mut ids: Vec<String> = match after {
            Some(after) => {
                sqlx::query_scalar(
                    "SELECT DISTINCT conversation_id FROM chat_messages WHERE conversation_id > ? ORDER BY conversation_id LIMIT ?",
                )
                .bind(after)
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT DISTINCT conversation_id FROM chat_messages ORDER BY conversation_id LIMIT ?",
                )
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let has_more = ids.len() > limit;
        if has_more {
            ids.pop();
        }
        let next_cursor = if has_more {
            ids.last().map(|id| encode_key_cursor(id))
        } else {
            None
        };

        Ok(Page {
            items: ids.into_iter().map(ConversationId::from).collect(),
            next_cursor,
        })
    }

    async fn query_old_messages(
        &self,
        conversation_id: &ConversationId,
        before: DateTime<Utc>,
    ) -> RecordStoreResult<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, timestamp_us, document FROM chat_messages
            WHERE conversation_id = ? AND timestamp_us < ?
            ORDER BY timestamp_us ASC, id ASC
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(before.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageRow::into_record).collect()
    }

    async fn delete_messages_atomic(
        &self,
        conversation_id: &ConversationId,
        ids: &[MessageId],
    ) -> RecordStoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for id in ids {
            deleted += sqlx::query("DELETE FROM chat_messages WHERE conversation_id = ? AND id = ?")
                .bind(conversation_id.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(deleted)
    }

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> RecordStoreResult<Vec<MessageId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let id = new_message_id();
            sqlx::query(
                "INSERT INTO chat_messages (id, conversation_id, timestamp_us, document) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(conversation_id.as_str())
            .bind(message.timestamp.timestamp_micros())
            .bind(serde_json::to_string(&message.to_document())?)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;

        Ok(ids)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::models::Role;

    async fn create_store() -> SqliteRecordStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create SQLite pool");
        SqliteRecordStore::from_pool(pool)
            .await
            .expect("Failed to create schema")
    }

    fn message(ts: DateTime<Utc>) -> Message {
        Message {
            role: Role::Assistant,
            content: "hello".into(),
            timestamp: ts,
            model: "gpt-4o-mini".into(),
            usage: Some(json!({"total_tokens": 5})),
        }
    }

    #[tokio::test]
    async fn test_append_query_delete() {
        let store = create_store().await;
        let alice = ConversationId::from("alice");
        let now = Utc::now();

        let ids = store
            .append_messages(
                &alice,
                &[message(now - Duration::days(200)), message(now - Duration::days(1))],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let old = store
            .query_old_messages(&alice, now - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].id, ids[0]);
        assert_eq!(old[0].document["usage"]["total_tokens"], 5);
        assert_eq!(
            old[0].timestamp.timestamp_micros(),
            (now - Duration::days(200)).timestamp_micros()
        );

        let deleted = store
            .delete_messages_atomic(&alice, &[ids[0].clone(), "gone".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(
            store
                .query_old_messages(&alice, now)
                .await
                .unwrap()
                .iter()
                .all(|r| r.id == ids[1])
        );
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_conversation() {
        let store = create_store().await;
        let alice = ConversationId::from("alice");
        let bob = ConversationId::from("bob");
        let ids = store
            .append_messages(&alice, &[message(Utc::now())])
            .await
            .unwrap();

        assert_eq!(store.delete_messages_atomic(&bob, &ids).await.unwrap(), 0);
        assert_eq!(store.delete_messages_atomic(&alice, &ids).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_conversations_pages() {
        let store = create_store().await;
        for name in ["d", "a", "c", "b"] {
            store
                .append_messages(&ConversationId::from(name), &[message(Utc::now())])
                .await
                .unwrap();
        }

        let first = store
            .list_conversations(PageRequest::first(3))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.items[0], ConversationId::from("a"));

        let second = store
            .list_conversations(PageRequest::after(first.next_cursor.unwrap(), 3))
            .await
            .unwrap();
        assert_eq!(second.items, vec![ConversationId::from("d")]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cursor_rejected() {
        let store = create_store().await;
        let result = store
            .list_conversations(PageRequest::after("***", 10))
            .await;
        assert!(matches!(result, Err(RecordStoreError::InvalidCursor(_))));
    }

    #[tokio::test]
    async fn test_raw_record_round_trip() {
        let store = create_store().await;
        let alice = ConversationId::from("alice");
        let record = MessageRecord {
            id: "raw-1".into(),
            timestamp: Utc::now() - Duration::days(400),
            document: json!({"role": "user"}).as_object().cloned().unwrap(),
        };
        store.insert_record(&alice, &record).await.unwrap();

        let old = store.query_old_messages(&alice, Utc::now()).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].document, record.document);
    }
}
