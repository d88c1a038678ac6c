use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::error::ColdStoreResult;
use crate::models::{Page, PageRequest};

/// Content type of every archive blob.
pub const BLOB_CONTENT_TYPE: &str = "application/json";

const META_USER_ID: &str = "userId";
const META_ARCHIVED_AT: &str = "archivedAt";
const META_MESSAGE_COUNT: &str = "messageCount";
const META_SHA256: &str = "sha256";

/// Object metadata attached to an archive blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub user_id: String,
    pub archived_at: DateTime<Utc>,
    pub message_count: usize,
    /// Hex-encoded SHA-256 of the payload.
    pub sha256: String,
}

impl BlobMetadata {
    pub fn new(
        user_id: impl Into<String>,
        archived_at: DateTime<Utc>,
        message_count: usize,
        payload: &[u8],
    ) -> Self {
        Self {
            user_id: user_id.into(),
            archived_at,
            message_count,
            sha256: payload_digest(payload),
        }
    }

    /// Flatten into string pairs for stores with string-only metadata.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (META_USER_ID.to_string(), self.user_id.clone()),
            (META_ARCHIVED_AT.to_string(), self.archived_at.to_rfc3339()),
            (
                META_MESSAGE_COUNT.to_string(),
                self.message_count.to_string(),
            ),
            (META_SHA256.to_string(), self.sha256.clone()),
        ]
    }

    /// Rebuild from string pairs. Keys match case-insensitively since S3
    /// lowercases user metadata names.
    ///
    /// Returns `None` if any field is missing or unparseable.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<Self> {
        let mut user_id = None;
        let mut archived_at = None;
        let mut message_count = None;
        let mut sha256 = None;

        for (key, value) in pairs {
            if key.eq_ignore_ascii_case(META_USER_ID) {
                user_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case(META_ARCHIVED_AT) {
                archived_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            } else if key.eq_ignore_ascii_case(META_MESSAGE_COUNT) {
                message_count = value.parse().ok();
            } else if key.eq_ignore_ascii_case(META_SHA256) {
                sha256 = Some(value.to_string());
            }
        }

        Some(Self {
            user_id: user_id?,
            archived_at: archived_at?,
            message_count: message_count?,
            sha256: sha256?,
        })
    }

    /// Whether `payload` hashes to the recorded digest.
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload_digest(payload).eq_ignore_ascii_case(&self.sha256)
    }
}

/// Hex-encoded SHA-256 digest of a payload.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// A blob read back from the cold store.
#[derive(Debug, Clone)]
pub struct Blob {
    pub key: String,
    pub payload: Vec<u8>,
    /// `None` when the object carries no (or unreadable) archive metadata.
    pub metadata: Option<BlobMetadata>,
    pub created_at: DateTime<Utc>,
}

/// A listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    /// When the current version of the object was written.
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Object storage for archive blobs.
///
/// Keys are `/`-separated. Writing to an existing key replaces the object
/// and resets its `created_at`.
#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Write (create or replace) a blob with its metadata.
    async fn write_blob(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> ColdStoreResult<()>;

    /// Read a blob, or `None` if the key does not exist.
    async fn read_blob(&self, key: &str) -> ColdStoreResult<Option<Blob>>;

    /// List objects whose key starts with `prefix`, in key order, one page
    /// at a time.
    async fn list_objects(
        &self,
        prefix: &str,
        page: PageRequest,
    ) -> ColdStoreResult<Page<ObjectInfo>>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> ColdStoreResult<()>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_metadata_pairs_round_trip() {
        let archived_at = Utc.with_ymd_and_hms(2024, 9, 1, 3, 0, 0).unwrap();
        let meta = BlobMetadata::new("alice", archived_at, 3, b"[]");

        let pairs = meta.to_pairs();
        let parsed =
            BlobMetadata::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_metadata_keys_are_case_insensitive() {
        let pairs = [
            ("userid", "bob"),
            ("archivedat", "2024-06-01T00:00:00Z"),
            ("messagecount", "2"),
            ("sha256", "abc"),
        ];
        let meta = BlobMetadata::from_pairs(pairs).unwrap();
        assert_eq!(meta.user_id, "bob");
        assert_eq!(meta.message_count, 2);
    }

    #[test]
    fn test_metadata_missing_field() {
        let pairs = [("userId", "bob"), ("messageCount", "2")];
        assert!(BlobMetadata::from_pairs(pairs).is_none());
    }

    #[test]
    fn test_digest_matches_payload() {
        let meta = BlobMetadata::new("alice", Utc::now(), 0, b"payload");
        assert!(meta.matches(b"payload"));
        assert!(!meta.matches(b"tampered"));
        assert_eq!(
            payload_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
