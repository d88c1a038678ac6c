use chrono::{DateTime, Utc};
use thiserror::Error;

use super::ArchivalReport;
use crate::{
    archive::ColdStoreError, config::RetentionPeriod, leases::LeaseError, models::ConversationId,
    records::RecordStoreError,
};

/// Errors from an archival pass or from archiving a single conversation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Record store error: {0}")]
    Records(#[from] RecordStoreError),

    #[error("Cold store error: {0}")]
    Cold(#[from] ColdStoreError),

    #[error("Lease store error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Archive blob '{key}' failed read-back verification")]
    Verification { key: String },

    #[error("Archive serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conversation id '{0}' cannot be used in an object key")]
    InvalidConversationId(ConversationId),

    #[error("Retention {retention} reaches before the start of the calendar from {now}")]
    InvalidThreshold {
        now: DateTime<Utc>,
        retention: RetentionPeriod,
    },

    #[error(
        "All {} attempted conversations failed to archive",
        .0.conversations_failed
    )]
    AllConversationsFailed(ArchivalReport),
}

/// Errors that abort a pruning pass.
///
/// Failures deleting individual objects are counted in the
/// [`PruneReport`](super::PruneReport) instead.
#[derive(Debug, Error)]
pub enum PruneError {
    #[error("Cold store error: {0}")]
    Cold(#[from] ColdStoreError),

    #[error("Lease store error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Another pruning pass holds the job lease")]
    AlreadyRunning,

    #[error("Retention {retention} reaches before the start of the calendar from {now}")]
    InvalidThreshold {
        now: DateTime<Utc>,
        retention: RetentionPeriod,
    },
}
