//! The polling boundary: one bounded fetch-archive-decode round per cycle,
//! plus the cycle driver that lands observations in the store.
//!
//! Everything here fails closed: a transport or decode failure ends the cycle
//! with a poll-log row and a log line, never an escaping error. The next
//! scheduled cycle is the retry mechanism; there is no in-process retry loop.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::archive::FeedArchive;
use crate::config::{Config, OtpThresholds};
use crate::extract::extract_stop_delays;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::gtfs_rt::FeedMessage;
use crate::model::PollHealthRecord;
use crate::parser::{feed_age, parse_feed};
use crate::store::Store;

pub struct FeedPoller<C: HttpClient> {
    client: C,
    url: String,
    timeout: Duration,
    max_feed_age: Duration,
    archive: Option<FeedArchive>,
}

impl<C: HttpClient> FeedPoller<C> {
    pub fn new(client: C, config: &Config, archive: Option<FeedArchive>) -> Self {
        Self {
            client,
            url: config.trip_updates_url.clone(),
            timeout: config.request_timeout,
            max_feed_age: config.max_feed_age,
            archive,
        }
    }

    /// Fetches and decodes the TripUpdates feed.
    ///
    /// Raw bytes are archived before parsing, so a corrupt payload is still
    /// recoverable. A stale feed is logged as a warning and returned anyway;
    /// staleness never suppresses ingestion.
    pub async fn fetch_trip_updates(&self) -> Result<FeedMessage> {
        let raw = fetch_bytes(&self.client, &self.url, self.timeout)
            .await
            .with_context(|| format!("fetching {}", self.url))?;
        debug!(bytes = raw.len(), "Feed bytes received");

        if let Some(archive) = &self.archive {
            // Archival failures should not cost us the observations.
            if let Err(e) = archive.write(&raw, "trip_updates", Utc::now()) {
                error!(error = %e, "Failed to archive raw feed");
            }
        }

        let feed = parse_feed(&raw).context("decoding TripUpdates feed")?;

        if let Some(age) = feed_age(&feed, Utc::now()) {
            if age > self.max_feed_age.as_secs() as i64 {
                warn!(
                    age_secs = age,
                    max_age_secs = self.max_feed_age.as_secs(),
                    "TripUpdates feed is stale"
                );
            }
        }

        Ok(feed)
    }
}

/// Runs one complete poll cycle: fetch, extract, upsert, and always append a
/// poll health row.
///
/// Fetch and decode failures are absorbed into the health row; only a storage
/// failure surfaces to the caller.
pub async fn run_poll_cycle<C: HttpClient>(
    poller: &FeedPoller<C>,
    store: &Store,
    thresholds: &OtpThresholds,
) -> Result<PollHealthRecord> {
    let polled_at = Utc::now();
    let fetch_start = Instant::now();

    let mut record = PollHealthRecord {
        polled_at,
        ..Default::default()
    };

    match poller.fetch_trip_updates().await {
        Ok(feed) => {
            record.fetch_duration_ms = Some(fetch_start.elapsed().as_millis() as i64);
            record.trip_feed_timestamp = feed
                .header
                .timestamp
                .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0));

            let process_start = Instant::now();
            let events = extract_stop_delays(&feed, polled_at, thresholds);
            let inserted = store.upsert_stop_delay_events(&events).await?;
            record.process_duration_ms = Some(process_start.elapsed().as_millis() as i64);
            record.trip_updates_count = Some(inserted as i64);

            info!(
                observations = inserted,
                entities = feed.entity.len(),
                fetch_ms = record.fetch_duration_ms,
                process_ms = record.process_duration_ms,
                "Poll cycle complete"
            );
        }
        Err(e) => {
            record.fetch_duration_ms = Some(fetch_start.elapsed().as_millis() as i64);
            record.error_message = Some(format!("{e:#}"));
            error!(error = %e, "Poll cycle failed, no observations written");
        }
    }

    store.log_poll(&record).await?;
    Ok(record)
}
