//! Archive-then-prune scenarios over in-memory stores.

use std::sync::{Arc, atomic::Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};

use super::support::{FaultyColdStore, FaultyRecordStore};
use crate::{
    archive::{BlobMetadata, ColdStore, MemoryColdStore, payload_digest},
    config::{ArchiverJobConfig, JobSafety, PrunerJobConfig, RetentionPeriod},
    jobs::{ArchiveError, Archiver, Pruner},
    leases::MemoryLeaseStore,
    models::{ArchivedMessage, ChatExchange, ConversationId, Message, Role},
    records::{MemoryRecordStore, RecordStore},
};

const PREFIX: &str = "chat-archives";

fn archive_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 3, 0, 0).unwrap()
}

fn message(content: &str, timestamp: DateTime<Utc>) -> Message {
    Message {
        role: Role::User,
        content: content.to_string(),
        timestamp,
        model: "gpt-4o".to_string(),
        usage: None,
    }
}

async fn seed(store: &dyn RecordStore, conversation: &str, messages: &[Message]) {
    store
        .append_messages(&ConversationId::from(conversation), messages)
        .await
        .unwrap();
}

async fn read_entries(cold: &dyn ColdStore, key: &str) -> Vec<ArchivedMessage> {
    let blob = cold.read_blob(key).await.unwrap().expect("blob exists");
    serde_json::from_slice(&blob.payload).unwrap()
}

fn archiver(
    records: Arc<dyn RecordStore>,
    cold: Arc<dyn ColdStore>,
    leases: Arc<MemoryLeaseStore>,
) -> Archiver {
    Archiver::new(records, cold, leases, PREFIX, ArchiverJobConfig::default())
}

#[tokio::test]
async fn test_alice_old_messages_archived_into_one_blob() {
    let records = Arc::new(MemoryRecordStore::new());
    let cold = Arc::new(MemoryColdStore::new());
    let four_months_ago = archive_time() - chrono::Months::new(4);

    seed(
        records.as_ref(),
        "alice",
        &[
            message("first", four_months_ago),
            message("second", four_months_ago + Duration::minutes(1)),
            message("third", four_months_ago + Duration::minutes(2)),
            message("yesterday", archive_time() - Duration::days(1)),
        ],
    )
    .await;

    let report = archiver(records.clone(), cold.clone(), Arc::new(MemoryLeaseStore::new()))
        .run_archival(archive_time(), RetentionPeriod::months(3))
        .await
        .unwrap();

    assert_eq!(report.archived, 3);
    assert_eq!(report.deleted, 3);
    assert_eq!(report.blobs_written, 1);
    assert_eq!(report.conversations_succeeded, 1);

    let key = "chat-archives/alice/2024-05.json";
    assert_eq!(cold.keys().await, vec![key.to_string()]);

    let live = records.messages(&"alice".into()).await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].document["content"], "yesterday");

    let blob = cold.read_blob(key).await.unwrap().unwrap();
    let metadata = blob.metadata.clone().unwrap();
    assert_eq!(metadata.user_id, "alice");
    assert_eq!(metadata.message_count, 3);
    assert_eq!(metadata.archived_at, archive_time());
    assert_eq!(metadata.sha256, payload_digest(&blob.payload));

    let entries: Vec<Value> = serde_json::from_slice(&blob.payload).unwrap();
    assert_eq!(entries.len(), 3);
    let contents: Vec<_> = entries.iter().map(|e| e["content"].clone()).collect();
    assert_eq!(contents, vec![json!("first"), json!("second"), json!("third")]);
    for entry in &entries {
        assert!(entry["id"].is_string());
        assert_eq!(entry["archivedAt"], "2024-09-01T03:00:00Z");
        assert_eq!(entry["role"], "user");
        assert_eq!(entry["model"], "gpt-4o");
    }
}

#[tokio::test]
async fn test_bob_only_expired_blob_pruned() {
    let cold = Arc::new(MemoryColdStore::new());
    let now = Utc.with_ymd_and_hms(2024, 9, 1, 4, 0, 0).unwrap();

    for (key, created_at) in [
        ("chat-archives/bob/2023-01.json", now - chrono::Months::new(13)),
        ("chat-archives/bob/2024-06.json", now - chrono::Months::new(2)),
    ] {
        cold.insert_with_created_at(
            key,
            b"[]".to_vec(),
            BlobMetadata::new("bob", created_at, 0, b"[]"),
            created_at,
        )
        .await;
    }

    let report = Pruner::new(
        cold.clone(),
        Arc::new(MemoryLeaseStore::new()),
        PREFIX,
        PrunerJobConfig::default(),
    )
    .run_pruning(now, RetentionPeriod::years(1))
    .await
    .unwrap();

    assert_eq!(report.deleted_count, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        cold.keys().await,
        vec!["chat-archives/bob/2024-06.json".to_string()]
    );
}

#[tokio::test]
async fn test_write_failure_means_zero_deletes() {
    let memory = Arc::new(MemoryRecordStore::new());
    let records = Arc::new(FaultyRecordStore::new(memory.clone()));
    let cold = Arc::new(FaultyColdStore::new(Arc::new(MemoryColdStore::new())));
    cold.fail_writes();

    let old = archive_time() - Duration::days(120);
    seed(memory.as_ref(), "alice", &[message("a", old), message("b", old)]).await;
    seed(memory.as_ref(), "bob", &[message("c", old)]).await;

    let err = archiver(records.clone(), cold.clone(), Arc::new(MemoryLeaseStore::new()))
        .run_archival(archive_time(), RetentionPeriod::months(3))
        .await
        .unwrap_err();

    let report = match err {
        ArchiveError::AllConversationsFailed(report) => report,
        other => panic!("expected every conversation to fail, got {other}"),
    };
    assert_eq!(report.conversations_failed, 2);
    assert_eq!(report.deleted, 0);
    assert!(cold.write_calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(records.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(memory.message_count().await, 3);
}

#[tokio::test]
async fn test_failed_verification_keeps_records() {
    let memory = Arc::new(MemoryRecordStore::new());
    let records = Arc::new(FaultyRecordStore::new(memory.clone()));
    let cold = Arc::new(FaultyColdStore::new(Arc::new(MemoryColdStore::new())));
    cold.corrupt_reads_after_write();

    seed(
        memory.as_ref(),
        "alice",
        &[message("a", archive_time() - Duration::days(120))],
    )
    .await;

    let err = archiver(records.clone(), cold, Arc::new(MemoryLeaseStore::new()))
        .run_archival(archive_time(), RetentionPeriod::months(3))
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::AllConversationsFailed(_)));
    assert_eq!(records.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(memory.message_count().await, 1);
}

#[tokio::test]
async fn test_one_failing_conversation_does_not_block_the_rest() {
    let memory = Arc::new(MemoryRecordStore::new());
    let records = Arc::new(FaultyRecordStore::new(memory.clone()));
    let cold = Arc::new(MemoryColdStore::new());
    let leases = Arc::new(MemoryLeaseStore::new());

    let old = archive_time() - Duration::days(120);
    for i in 0..5 {
        seed(
            memory.as_ref(),
            &format!("user-{i}"),
            &[message("a", old), message("b", old + Duration::seconds(1))],
        )
        .await;
    }
    records.fail_deletes_for("user-2");

    let job = archiver(records.clone(), cold.clone(), leases);
    let report = job
        .run_archival(archive_time(), RetentionPeriod::months(3))
        .await
        .unwrap();

    assert_eq!(report.conversations_succeeded, 4);
    assert_eq!(report.conversations_failed, 1);
    assert_eq!(report.deleted, 8);
    assert_eq!(memory.messages(&"user-2".into()).await.len(), 2);
    // The blob was written before the delete failed.
    assert_eq!(cold.len().await, 5);

    // Next run picks up the leftover messages without duplicating them.
    records.heal();
    let retry = job
        .run_archival(archive_time(), RetentionPeriod::months(3))
        .await
        .unwrap();

    assert_eq!(retry.conversations_succeeded, 1);
    assert_eq!(retry.deleted, 2);
    assert_eq!(retry.blobs_written, 0);
    assert_eq!(memory.message_count().await, 0);
    let entries = read_entries(cold.as_ref(), "chat-archives/user-2/2024-05.json").await;
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_prune_delete_failure_is_isolated() {
    let memory = Arc::new(MemoryColdStore::new());
    let cold = Arc::new(FaultyColdStore::new(memory.clone()));
    let now = Utc.with_ymd_and_hms(2024, 9, 1, 4, 0, 0).unwrap();
    let expired = now - Duration::days(800);

    for month in ["2022-01", "2022-02", "2022-03"] {
        memory
            .insert_with_created_at(
                format!("chat-archives/bob/{month}.json"),
                b"[]".to_vec(),
                BlobMetadata::new("bob", expired, 0, b"[]"),
                expired,
            )
            .await;
    }
    cold.fail_delete_of("chat-archives/bob/2022-02.json");

    let report = Pruner::new(
        cold,
        Arc::new(MemoryLeaseStore::new()),
        PREFIX,
        PrunerJobConfig::default(),
    )
    .run_pruning(now, RetentionPeriod::years(1))
    .await
    .unwrap();

    assert_eq!(report.expired, 3);
    assert_eq!(report.deleted_count, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(
        memory.keys().await,
        vec!["chat-archives/bob/2022-02.json".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_archive_write_times_out_without_deleting() {
    let memory = Arc::new(MemoryRecordStore::new());
    let records = Arc::new(FaultyRecordStore::new(memory.clone()));
    let cold_memory = Arc::new(MemoryColdStore::new());
    let cold = Arc::new(FaultyColdStore::new(cold_memory.clone()));
    let old = archive_time() - Duration::days(120);

    for user in ["carol", "dave", "erin"] {
        seed(memory.as_ref(), user, &[message("old", old)]).await;
    }
    cold.hang_under("chat-archives/dave/");

    let config = ArchiverJobConfig {
        safety: JobSafety {
            store_timeout_secs: 5,
            ..JobSafety::default()
        },
        ..ArchiverJobConfig::default()
    };
    let report = Archiver::new(
        records.clone(),
        cold.clone(),
        Arc::new(MemoryLeaseStore::new()),
        PREFIX,
        config,
    )
    .run_archival(archive_time(), RetentionPeriod::months(3))
    .await
    .unwrap();

    assert_eq!(report.conversations_failed, 1);
    assert_eq!(report.conversations_succeeded, 2);
    assert_eq!(report.deleted, 2);
    assert_eq!(records.delete_calls.load(Ordering::SeqCst), 2);
    assert_eq!(memory.messages(&"dave".into()).await.len(), 1);
    assert_eq!(
        cold_memory.keys().await,
        vec![
            "chat-archives/carol/2024-05.json".to_string(),
            "chat-archives/erin/2024-05.json".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_prune_delete_times_out_and_is_counted() {
    let memory = Arc::new(MemoryColdStore::new());
    let cold = Arc::new(FaultyColdStore::new(memory.clone()));
    let now = Utc.with_ymd_and_hms(2024, 9, 1, 4, 0, 0).unwrap();
    let expired = now - Duration::days(800);

    for user in ["bob", "carol"] {
        memory
            .insert_with_created_at(
                format!("chat-archives/{user}/2022-01.json"),
                b"[]".to_vec(),
                BlobMetadata::new(user, expired, 0, b"[]"),
                expired,
            )
            .await;
    }
    cold.hang_under("chat-archives/bob/");

    let report = Pruner::new(
        cold,
        Arc::new(MemoryLeaseStore::new()),
        PREFIX,
        PrunerJobConfig::default(),
    )
    .run_pruning(now, RetentionPeriod::years(1))
    .await
    .unwrap();

    assert_eq!(report.deleted_count, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
        memory.keys().await,
        vec!["chat-archives/bob/2022-01.json".to_string()]
    );
}

#[tokio::test]
async fn test_concurrent_runs_archive_each_message_once() {
    let records = Arc::new(MemoryRecordStore::new());
    let cold = Arc::new(MemoryColdStore::new());
    let leases = Arc::new(MemoryLeaseStore::new());

    let old = archive_time() - Duration::days(120);
    for i in 0..6 {
        let messages: Vec<_> = (0..3)
            .map(|n| message(&format!("m{n}"), old + Duration::minutes(n)))
            .collect();
        seed(records.as_ref(), &format!("user-{i}"), &messages).await;
    }

    let config = ArchiverJobConfig {
        safety: JobSafety {
            page_size: 2,
            ..JobSafety::default()
        },
        ..ArchiverJobConfig::default()
    };
    let first = Archiver::new(
        records.clone(),
        cold.clone(),
        leases.clone(),
        PREFIX,
        config.clone(),
    );
    let second = Archiver::new(records.clone(), cold.clone(), leases, PREFIX, config);

    let (a, b) = tokio::join!(
        first.run_archival(archive_time(), RetentionPeriod::months(3)),
        second.run_archival(archive_time(), RetentionPeriod::months(3)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.deleted + b.deleted, 18);
    assert_eq!(records.message_count().await, 0);
    for key in cold.keys().await {
        let entries = read_entries(cold.as_ref(), &key).await;
        assert_eq!(entries.len(), 3, "{key}");
    }
}

#[tokio::test]
async fn test_relay_exchange_lifecycle() {
    let records = Arc::new(MemoryRecordStore::new());
    let cold = Arc::new(MemoryColdStore::new());
    let leases = Arc::new(MemoryLeaseStore::new());
    let now = Utc::now();

    let old_exchange = ChatExchange {
        user_content: "What's for dinner?".into(),
        assistant_content: "Pasta.".into(),
        model: "gpt-4o-mini".into(),
        usage: Some(json!({ "prompt_tokens": 12, "completion_tokens": 3 })),
    };
    let recent_exchange = ChatExchange {
        user_content: "And tomorrow?".into(),
        assistant_content: "Soup.".into(),
        model: "gpt-4o-mini".into(),
        usage: None,
    };
    seed(
        records.as_ref(),
        "carol",
        &old_exchange.into_messages(now - Duration::days(150)),
    )
    .await;
    seed(
        records.as_ref(),
        "carol",
        &recent_exchange.into_messages(now - Duration::days(2)),
    )
    .await;

    let report = archiver(records.clone(), cold.clone(), leases.clone())
        .run_archival(now, RetentionPeriod::months(3))
        .await
        .unwrap();
    assert_eq!(report.archived, 2);
    assert_eq!(records.message_count().await, 2);

    let keys = cold.keys().await;
    assert_eq!(keys.len(), 1);
    let entries = read_entries(cold.as_ref(), &keys[0]).await;
    let assistant = entries
        .iter()
        .find(|e| e.role == Role::Assistant)
        .expect("assistant turn archived");
    assert_eq!(
        assistant.usage,
        Some(json!({ "prompt_tokens": 12, "completion_tokens": 3 }))
    );

    // Blobs age from when they were written, not from the messages they hold.
    let pruner = Pruner::new(cold.clone(), leases, PREFIX, PrunerJobConfig::default());
    let early = pruner
        .run_pruning(Utc::now(), RetentionPeriod::years(1))
        .await
        .unwrap();
    assert_eq!(early.deleted_count, 0);

    let later = pruner
        .run_pruning(Utc::now() + Duration::days(400), RetentionPeriod::years(1))
        .await
        .unwrap();
    assert_eq!(later.deleted_count, 1);
    assert!(cold.is_empty().await);
}
