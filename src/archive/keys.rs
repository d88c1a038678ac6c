use chrono::{DateTime, Datelike, Utc};

use crate::models::ConversationId;

/// Default key prefix under which all archive blobs live.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "chat-archives";

/// A year-month period grouping archived messages into one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    pub year: i32,
    pub month: u32,
}

impl Bucket {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// Parse `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

/// Key prefix covering every blob of one conversation.
pub fn conversation_prefix(prefix: &str, conversation_id: &ConversationId) -> String {
    format!("{}/{}/", normalize_prefix(prefix), conversation_id)
}

/// `{prefix}/{conversationId}/{YYYY}-{MM}.json`
pub fn archive_key(prefix: &str, conversation_id: &ConversationId, bucket: Bucket) -> String {
    format!(
        "{}{}.json",
        conversation_prefix(prefix, conversation_id),
        bucket
    )
}

/// Key prefix used to enumerate all archive blobs.
pub fn listing_prefix(prefix: &str) -> String {
    format!("{}/", normalize_prefix(prefix))
}

/// Split an archive key back into conversation and bucket.
pub fn parse_archive_key(prefix: &str, key: &str) -> Option<(ConversationId, Bucket)> {
    let rest = key.strip_prefix(&listing_prefix(prefix))?;
    let (conversation, file) = rest.split_once('/')?;
    let bucket = Bucket::parse(file.strip_suffix(".json")?)?;
    let conversation = ConversationId::from(conversation);
    conversation.is_key_safe().then_some((conversation, bucket))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_archive_key_layout() {
        let bucket = Bucket::new(2024, 1).unwrap();
        assert_eq!(
            archive_key(DEFAULT_ARCHIVE_PREFIX, &"alice".into(), bucket),
            "chat-archives/alice/2024-01.json"
        );
        assert_eq!(
            archive_key("/archives/", &"alice".into(), bucket),
            "archives/alice/2024-01.json"
        );
    }

    #[test]
    fn test_bucket_of_timestamp() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(Bucket::of(ts).to_string(), "2023-12");
    }

    #[rstest]
    #[case("chat-archives/bob/2023-01.json", Some(("bob", 2023, 1)))]
    #[case("chat-archives/bob/2024-12.json", Some(("bob", 2024, 12)))]
    #[case("chat-archives/bob/2024-13.json", None)]
    #[case("chat-archives/bob/2024-1.json", None)]
    #[case("chat-archives/bob/2024-01.txt", None)]
    #[case("chat-archives/bob/nested/2024-01.json", None)]
    #[case("other/bob/2024-01.json", None)]
    fn test_parse_archive_key(#[case] key: &str, #[case] expected: Option<(&str, i32, u32)>) {
        let parsed = parse_archive_key(DEFAULT_ARCHIVE_PREFIX, key);
        let expected = expected.map(|(id, y, m)| (ConversationId::from(id), Bucket::new(y, m).unwrap()));
        assert_eq!(parsed, expected);
    }
}
