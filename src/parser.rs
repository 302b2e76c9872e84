//! Protobuf decoding and staleness assessment for GTFS Realtime feeds.

use anyhow::Result;
use chrono::{DateTime, Utc};
use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Age of the feed in seconds relative to `now`, taken from the header
/// generation timestamp. `None` when the header carries no timestamp.
pub fn feed_age(feed: &FeedMessage, now: DateTime<Utc>) -> Option<i64> {
    feed.header.timestamp.map(|ts| now.timestamp() - ts as i64)
}

/// Whether the feed generation timestamp is older than `max_age_seconds`.
///
/// Staleness is advisory: a stale feed is still processed, the flag only
/// marks a warning condition for operational monitoring. A feed without a
/// header timestamp is never considered stale.
pub fn is_feed_stale(feed: &FeedMessage, now: DateTime<Utc>, max_age_seconds: i64) -> bool {
    match feed_age(feed, now) {
        Some(age) => age > max_age_seconds,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedHeader, FeedMessage};

    fn feed_with_timestamp(timestamp: Option<u64>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp,
                incrementality: None,
                feed_version: None,
            },
            entity: vec![],
        }
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty byte array decodes to a FeedMessage with default values
        let result = parse_feed(&[]);
        assert!(result.is_ok());
        let feed = result.unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = parse_feed(&invalid_bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_valid_minimal_feed() {
        use prost::Message;

        let feed = feed_with_timestamp(Some(1234567890));
        let encoded = feed.encode_to_vec();
        let result = parse_feed(&encoded);

        assert!(result.is_ok());
        let parsed = result.unwrap();
        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
        assert_eq!(parsed.header.timestamp, Some(1234567890));
    }

    #[test]
    fn test_feed_age() {
        let now = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        let feed = feed_with_timestamp(Some(1_700_000_000));
        assert_eq!(feed_age(&feed, now), Some(500));
    }

    #[test]
    fn test_feed_age_missing_timestamp() {
        let now = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        let feed = feed_with_timestamp(None);
        assert_eq!(feed_age(&feed, now), None);
    }

    #[test]
    fn test_staleness_threshold() {
        let now = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        let fresh = feed_with_timestamp(Some(1_700_000_400));
        let stale = feed_with_timestamp(Some(1_700_000_000));

        assert!(!is_feed_stale(&fresh, now, 300));
        assert!(is_feed_stale(&stale, now, 300));

        // Exactly at the threshold is not yet stale
        let boundary = feed_with_timestamp(Some(1_700_000_200));
        assert!(!is_feed_stale(&boundary, now, 300));
    }

    #[test]
    fn test_feed_without_timestamp_is_never_stale() {
        let now = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        let feed = feed_with_timestamp(None);
        assert!(!is_feed_stale(&feed, now, 300));
    }
}
