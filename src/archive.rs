//! Raw feed archival.
//!
//! Every successfully fetched payload can be persisted gzip-compressed under a
//! per-day directory, before parsing, so corrupt payloads stay recoverable for
//! debugging and replay.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

pub struct FeedArchive {
    dir: PathBuf,
}

impl FeedArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes raw feed bytes to `<dir>/<YYYYMMDD>/<feed_type>_<YYYYMMDD_HHMMSS>.pb.gz`.
    pub fn write(&self, data: &[u8], feed_type: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let day_dir = self.dir.join(now.format("%Y%m%d").to_string());
        fs::create_dir_all(&day_dir)
            .with_context(|| format!("creating archive directory {}", day_dir.display()))?;

        let filename = format!("{feed_type}_{}.pb.gz", now.format("%Y%m%d_%H%M%S"));
        let path = day_dir.join(filename);

        let file = fs::File::create(&path)
            .with_context(|| format!("creating archive file {}", path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(data)?;
        encoder.finish()?;

        debug!(path = %path.display(), bytes = data.len(), "Archived raw feed");
        Ok(path)
    }

    /// Deletes day directories older than `retention_days`. Returns the number
    /// of directories removed. Directories not named like a day are left alone.
    pub fn prune(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = now
            .date_naive()
            .checked_sub_days(Days::new(retention_days as u64))
            .context("archive retention underflows the calendar")?;

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(day) = name
                .to_str()
                .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y%m%d").ok())
            else {
                continue;
            };
            if day < cutoff {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, retention_days, "Pruned expired archive days");
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_archive(name: &str) -> FeedArchive {
        let dir = env::temp_dir().join(format!("otp_tracker_archive_{name}"));
        let _ = fs::remove_dir_all(&dir);
        FeedArchive::new(dir)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_write_creates_gzipped_file_under_day_dir() {
        let archive = temp_archive("write");
        // 2024-01-15 14:30:00 UTC
        let path = archive.write(b"raw feed bytes", "trip_updates", at(1_705_329_000)).unwrap();

        assert!(path.exists());
        assert!(path.to_str().unwrap().contains("20240115"));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("trip_updates_"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("gz"));

        // Gzip magic bytes
        let content = fs::read(&path).unwrap();
        assert_eq!(&content[..2], &[0x1f, 0x8b]);

        fs::remove_dir_all(archive.dir()).unwrap();
    }

    #[test]
    fn test_prune_removes_only_expired_days() {
        let archive = temp_archive("prune");
        let now = at(1_705_329_000); // 2024-01-15

        archive.write(b"old", "trip_updates", at(1_704_000_000)).unwrap(); // 2023-12-31
        archive.write(b"new", "trip_updates", now).unwrap();
        fs::create_dir_all(archive.dir().join("not-a-day")).unwrap();

        let removed = archive.prune(7, now).unwrap();

        assert_eq!(removed, 1);
        assert!(!archive.dir().join("20231231").exists());
        assert!(archive.dir().join("20240115").exists());
        assert!(archive.dir().join("not-a-day").exists());

        fs::remove_dir_all(archive.dir()).unwrap();
    }

    #[test]
    fn test_prune_on_missing_dir_is_noop() {
        let archive = FeedArchive::new(env::temp_dir().join("otp_tracker_archive_missing"));
        let _ = fs::remove_dir_all(archive.dir());
        assert_eq!(archive.prune(7, at(1_705_329_000)).unwrap(), 0);
    }
}
