//! Runtime configuration for the OTP tracker.
//!
//! All settings are environment-overridable and materialized once at process
//! start into a [`Config`] value that is passed into each component.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default TripUpdates feed for Halifax Transit.
pub const DEFAULT_TRIP_UPDATES_URL: &str =
    "https://gtfs.halifax.ca/realtime/TripUpdate/TripUpdates.pb";

/// Default static GTFS bundle matching the realtime feed above.
pub const DEFAULT_STATIC_GTFS_URL: &str = "https://gtfs.halifax.ca/static/google_transit.zip";

/// On-time classification window in signed seconds of delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpThresholds {
    /// Most-negative delay still considered on-time (inclusive).
    pub early: i32,
    /// Most-positive delay still considered on-time (inclusive).
    pub late: i32,
}

impl Default for OtpThresholds {
    fn default() -> Self {
        Self {
            early: -60,
            late: 300,
        }
    }
}

impl OtpThresholds {
    /// Classifies a delay value against the on-time window.
    ///
    /// Returns `None` when the delay is unknown; classification is undefined
    /// rather than false in that case.
    pub fn classify(&self, delay_seconds: Option<i32>) -> Option<bool> {
        delay_seconds.map(|d| self.early <= d && d <= self.late)
    }
}

/// Process-wide configuration, built from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub trip_updates_url: String,
    pub static_gtfs_url: String,
    pub db_path: PathBuf,
    pub archive_dir: PathBuf,
    pub gtfs_dir: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_feed_age: Duration,
    pub archive_retention_days: u32,
    pub thresholds: OtpThresholds,
}

impl Config {
    /// Reads configuration from the environment, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a set variable fails to parse; unset variables
    /// silently take their defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            trip_updates_url: env_or("TRIP_UPDATES_URL", DEFAULT_TRIP_UPDATES_URL.to_string()),
            static_gtfs_url: env_or("STATIC_GTFS_URL", DEFAULT_STATIC_GTFS_URL.to_string()),
            db_path: PathBuf::from(env_or("DATABASE_PATH", "data/transit.db".to_string())),
            archive_dir: PathBuf::from(env_or("ARCHIVE_DIR", "data/archive".to_string())),
            gtfs_dir: PathBuf::from(env_or("GTFS_DIR", "data/gtfs".to_string())),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECONDS", 60)?),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECONDS", 10)?),
            max_feed_age: Duration::from_secs(env_parse("MAX_FEED_AGE_SECONDS", 300)?),
            archive_retention_days: env_parse("ARCHIVE_RETENTION_DAYS", 90)?,
            thresholds: OtpThresholds {
                early: env_parse("EARLY_THRESHOLD", -60)?,
                late: env_parse("LATE_THRESHOLD", 300)?,
            },
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_within_window() {
        let t = OtpThresholds::default();
        assert_eq!(t.classify(Some(0)), Some(true));
        assert_eq!(t.classify(Some(120)), Some(true));
        assert_eq!(t.classify(Some(-30)), Some(true));
    }

    #[test]
    fn test_classify_boundaries_are_on_time() {
        let t = OtpThresholds::default();
        assert_eq!(t.classify(Some(-60)), Some(true));
        assert_eq!(t.classify(Some(300)), Some(true));
    }

    #[test]
    fn test_classify_outside_window() {
        let t = OtpThresholds::default();
        assert_eq!(t.classify(Some(-61)), Some(false));
        assert_eq!(t.classify(Some(301)), Some(false));
        assert_eq!(t.classify(Some(400)), Some(false));
    }

    #[test]
    fn test_classify_unknown_delay_is_undefined() {
        let t = OtpThresholds::default();
        assert_eq!(t.classify(None), None);
    }

    #[test]
    fn test_classify_custom_thresholds() {
        let t = OtpThresholds { early: 0, late: 60 };
        assert_eq!(t.classify(Some(-1)), Some(false));
        assert_eq!(t.classify(Some(0)), Some(true));
        assert_eq!(t.classify(Some(60)), Some(true));
        assert_eq!(t.classify(Some(61)), Some(false));
    }
}
