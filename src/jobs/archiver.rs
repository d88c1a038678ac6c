//! Archiver: moves messages past the hot retention period into cold storage.
//!
//! Per conversation, every bucket blob is written (and optionally read back
//! and verified) before a single record is deleted. A failure at any step
//! leaves the messages live so the next run picks them up again, and blob
//! writes merge by message id so that re-run rewrites nothing it already
//! holds.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::{error::ArchiveError, timeout::with_timeout};
use crate::{
    archive::{BlobMetadata, Bucket, ColdStore, archive_key},
    config::{ArchiverJobConfig, BucketStrategy, RetentionPeriod},
    leases::{LeaseStore, conversation_lease_key, new_holder_id},
    models::{ArchivedMessage, ConversationId, MessageId, PageRequest},
    observability::metrics,
    records::RecordStore,
};

/// Results from a single archival run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchivalReport {
    /// Whether the run only logged what it would have done.
    pub dry_run: bool,
    /// Conversations enumerated from the record store.
    pub conversations_scanned: u64,
    /// Conversations with old messages that were archived without error.
    pub conversations_succeeded: u64,
    /// Conversations whose archival failed; their messages stay live.
    pub conversations_failed: u64,
    /// Conversations skipped because another run holds their lease.
    pub skipped_locked: u64,
    /// Messages copied into cold storage (candidates, in a dry run).
    pub archived: u64,
    /// Messages removed from the record store.
    pub deleted: u64,
    /// Old records that could not be read as messages and were left live.
    pub skipped_malformed: u64,
    /// Archive blobs created or rewritten.
    pub blobs_written: u64,
    /// Duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl ArchivalReport {
    /// Check if the run moved or removed anything.
    pub fn has_changes(&self) -> bool {
        self.archived > 0 || self.deleted > 0 || self.blobs_written > 0
    }

    fn status(&self) -> &'static str {
        match (self.conversations_succeeded, self.conversations_failed) {
            (_, 0) => "success",
            (0, _) => "error",
            _ => "partial",
        }
    }
}

#[derive(Debug, Default)]
struct ConversationStats {
    archived: u64,
    deleted: u64,
    skipped_malformed: u64,
    blobs_written: u64,
}

#[derive(Debug)]
enum ConversationOutcome {
    /// No message is older than the threshold.
    NothingToArchive,
    Locked,
    /// Every old record was malformed; nothing was archived.
    OnlyMalformed(u64),
    Archived(ConversationStats),
}

/// Moves old messages from a [`RecordStore`] into a [`ColdStore`].
pub struct Archiver {
    records: Arc<dyn RecordStore>,
    cold: Arc<dyn ColdStore>,
    leases: Arc<dyn LeaseStore>,
    prefix: String,
    config: ArchiverJobConfig,
}

impl Archiver {
    pub fn new(
        records: Arc<dyn RecordStore>,
        cold: Arc<dyn ColdStore>,
        leases: Arc<dyn LeaseStore>,
        prefix: impl Into<String>,
        config: ArchiverJobConfig,
    ) -> Self {
        Self {
            records,
            cold,
            leases,
            prefix: prefix.into(),
            config,
        }
    }

    pub fn config(&self) -> &ArchiverJobConfig {
        &self.config
    }

    /// Archive every message with `timestamp < now - hot_retention`.
    ///
    /// Failures are isolated per conversation and counted in the report. The
    /// run itself fails only when enumerating conversations fails, or when
    /// every conversation it attempted failed.
    #[instrument(
        skip(self, hot_retention),
        fields(
            hot_retention = %hot_retention,
            dry_run = self.config.safety.dry_run,
            records = self.records.backend_name(),
            cold = self.cold.backend_name(),
        )
    )]
    pub async fn run_archival(
        &self,
        now: DateTime<Utc>,
        hot_retention: RetentionPeriod,
    ) -> Result<ArchivalReport, ArchiveError> {
        let start = Instant::now();
        let threshold = hot_retention
            .threshold(now)
            .ok_or(ArchiveError::InvalidThreshold {
                now,
                retention: hot_retention,
            })?;

        let mut report = ArchivalReport {
            dry_run: self.config.safety.dry_run,
            ..ArchivalReport::default()
        };

        let result = self.archive_all(now, threshold, &mut report).await;
        report.duration_ms = start.elapsed().as_millis() as u64;
        let duration_secs = start.elapsed().as_secs_f64();

        if let Err(e) = result {
            metrics::record_job_run("archiver", "error", duration_secs);
            return Err(e);
        }

        self.record_metrics(&report, duration_secs);
        if report.conversations_succeeded == 0 && report.conversations_failed > 0 {
            return Err(ArchiveError::AllConversationsFailed(report));
        }
        Ok(report)
    }

    async fn archive_all(
        &self,
        now: DateTime<Utc>,
        threshold: DateTime<Utc>,
        report: &mut ArchivalReport,
    ) -> Result<(), ArchiveError> {
        let safety = &self.config.safety;
        let holder = new_holder_id();
        let holder = holder.as_str();
        let mut page = PageRequest::first(safety.page_size);

        loop {
            let conversations = with_timeout(
                safety.store_timeout(),
                self.records.list_conversations(page),
            )
            .await?;
            report.conversations_scanned += conversations.items.len() as u64;

            let outcomes: Vec<_> = stream::iter(conversations.items)
                .map(|conversation_id| async move {
                    let outcome = self
                        .archive_conversation(&conversation_id, holder, now, threshold)
                        .await;
                    (conversation_id, outcome)
                })
                .buffer_unordered(safety.max_concurrency)
                .collect()
                .await;

            for (conversation_id, outcome) in outcomes {
                match outcome {
                    Ok(ConversationOutcome::NothingToArchive) => {}
                    Ok(ConversationOutcome::Locked) => {
                        debug!(
                            conversation_id = %conversation_id,
                            "Conversation is being archived elsewhere, skipping"
                        );
                        report.skipped_locked += 1;
                    }
                    Ok(ConversationOutcome::OnlyMalformed(skipped)) => {
                        report.skipped_malformed += skipped;
                    }
                    Ok(ConversationOutcome::Archived(stats)) => {
                        report.conversations_succeeded += 1;
                        report.archived += stats.archived;
                        report.deleted += stats.deleted;
                        report.skipped_malformed += stats.skipped_malformed;
                        report.blobs_written += stats.blobs_written;
                    }
                    Err(e) => {
                        error!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "Failed to archive conversation, messages left in place"
                        );
                        report.conversations_failed += 1;
                    }
                }
            }

            match conversations.next_cursor {
                Some(cursor) => page = PageRequest::after(cursor, safety.page_size),
                None => return Ok(()),
            }
        }
    }

    #[instrument(
        skip(self, conversation_id, holder, now, threshold),
        fields(conversation_id = %conversation_id)
    )]
    async fn archive_conversation(
        &self,
        conversation_id: &ConversationId,
        holder: &str,
        now: DateTime<Utc>,
        threshold: DateTime<Utc>,
    ) -> Result<ConversationOutcome, ArchiveError> {
        let safety = &self.config.safety;
        let timeout = safety.store_timeout();

        let records = with_timeout(
            timeout,
            self.records.query_old_messages(conversation_id, threshold),
        )
        .await?;
        if records.is_empty() {
            return Ok(ConversationOutcome::NothingToArchive);
        }
        if !conversation_id.is_key_safe() {
            return Err(ArchiveError::InvalidConversationId(conversation_id.clone()));
        }

        let mut stats = ConversationStats::default();
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            match ArchivedMessage::from_record(record, now) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        message_id = %record.id,
                        error = %e,
                        "Skipping malformed message, it stays in the record store"
                    );
                    stats.skipped_malformed += 1;
                }
            }
        }
        if entries.is_empty() {
            return Ok(ConversationOutcome::OnlyMalformed(stats.skipped_malformed));
        }

        let buckets = self.group_by_bucket(entries, threshold);

        if safety.dry_run {
            for (bucket, entries) in &buckets {
                info!(
                    key = %archive_key(&self.prefix, conversation_id, *bucket),
                    messages = entries.len(),
                    "DRY RUN: Would archive messages"
                );
                stats.archived += entries.len() as u64;
            }
            return Ok(ConversationOutcome::Archived(stats));
        }

        let lease_key = conversation_lease_key(conversation_id.as_str());
        let acquired = with_timeout(
            timeout,
            self.leases.try_acquire(&lease_key, holder, safety.lease_ttl()),
        )
        .await?;
        if !acquired {
            return Ok(ConversationOutcome::Locked);
        }

        let result = self
            .archive_buckets(conversation_id, buckets, now, stats)
            .await;

        match with_timeout(timeout, self.leases.release(&lease_key, holder)).await {
            Ok(true) => {}
            Ok(false) => warn!(
                lease_key = %lease_key,
                "Conversation lease expired before it was released"
            ),
            Err(e) => warn!(
                lease_key = %lease_key,
                error = %e,
                "Failed to release conversation lease"
            ),
        }

        result
    }

    /// Write every bucket, then delete the archived records in one batch.
    async fn archive_buckets(
        &self,
        conversation_id: &ConversationId,
        buckets: BTreeMap<Bucket, Vec<ArchivedMessage>>,
        now: DateTime<Utc>,
        mut stats: ConversationStats,
    ) -> Result<ConversationOutcome, ArchiveError> {
        let mut archived_ids: Vec<MessageId> = Vec::new();

        for (bucket, entries) in buckets {
            let key = archive_key(&self.prefix, conversation_id, bucket);
            archived_ids.extend(entries.iter().map(|entry| entry.id.clone()));
            if self.write_bucket(conversation_id, &key, entries, now).await? {
                stats.blobs_written += 1;
            }
        }

        let deleted = with_timeout(
            self.config.safety.store_timeout(),
            self.records
                .delete_messages_atomic(conversation_id, &archived_ids),
        )
        .await?;

        if deleted < archived_ids.len() as u64 {
            debug!(
                expected = archived_ids.len(),
                deleted, "Some archived messages were already gone from the record store"
            );
        }

        stats.archived = archived_ids.len() as u64;
        stats.deleted = deleted;
        Ok(ConversationOutcome::Archived(stats))
    }

    /// Merge `entries` into the blob at `key`. Returns false when the blob
    /// already held every entry and nothing was written.
    async fn write_bucket(
        &self,
        conversation_id: &ConversationId,
        key: &str,
        entries: Vec<ArchivedMessage>,
        now: DateTime<Utc>,
    ) -> Result<bool, ArchiveError> {
        let timeout = self.config.safety.store_timeout();

        let existing = match with_timeout(timeout, self.cold.read_blob(key)).await? {
            Some(blob) => serde_json::from_slice::<Vec<ArchivedMessage>>(&blob.payload)?,
            None => Vec::new(),
        };
        let existing_len = existing.len();
        let merged = merge_entries(existing, entries);
        if merged.len() == existing_len {
            debug!(key, "Archive blob already holds every message");
            return Ok(false);
        }

        let payload = serde_json::to_vec(&merged)?;
        let metadata = BlobMetadata::new(conversation_id.as_str(), now, merged.len(), &payload);
        with_timeout(timeout, self.cold.write_blob(key, payload, &metadata)).await?;

        if self.config.verify_writes {
            let stored = with_timeout(timeout, self.cold.read_blob(key)).await?;
            if !stored.is_some_and(|blob| metadata.matches(&blob.payload)) {
                return Err(ArchiveError::Verification {
                    key: key.to_string(),
                });
            }
        }

        debug!(
            key,
            messages = merged.len(),
            added = merged.len() - existing_len,
            "Wrote archive blob"
        );
        Ok(true)
    }

    fn group_by_bucket(
        &self,
        entries: Vec<ArchivedMessage>,
        threshold: DateTime<Utc>,
    ) -> BTreeMap<Bucket, Vec<ArchivedMessage>> {
        let mut buckets: BTreeMap<Bucket, Vec<ArchivedMessage>> = BTreeMap::new();
        for entry in entries {
            let bucket = match self.config.bucket_strategy {
                BucketStrategy::MessageMonth => Bucket::of(entry.timestamp),
                BucketStrategy::RunMonth => Bucket::of(threshold),
            };
            buckets.entry(bucket).or_default().push(entry);
        }
        buckets
    }

    fn record_metrics(&self, report: &ArchivalReport, duration_secs: f64) {
        metrics::record_job_run("archiver", report.status(), duration_secs);
        metrics::record_archive_conversations("succeeded", report.conversations_succeeded);
        metrics::record_archive_conversations("failed", report.conversations_failed);
        metrics::record_archive_conversations("skipped_locked", report.skipped_locked);
        metrics::record_archived_messages("skipped_malformed", report.skipped_malformed);
        if !report.dry_run {
            metrics::record_archived_messages("archived", report.archived);
            metrics::record_archived_messages("deleted", report.deleted);
            metrics::record_blobs_written(report.blobs_written);
        }
    }
}

/// Merge new entries into an existing blob's entries.
///
/// Existing entries win on id collisions. The result is ordered by timestamp,
/// then id.
fn merge_entries(
    existing: Vec<ArchivedMessage>,
    incoming: Vec<ArchivedMessage>,
) -> Vec<ArchivedMessage> {
    let mut seen: HashSet<MessageId> = existing.iter().map(|entry| entry.id.clone()).collect();
    let mut merged = existing;
    merged.extend(incoming.into_iter().filter(|entry| seen.insert(entry.id.clone())));
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    merged
}
