//! SQLite-backed persistence.
//!
//! A [`Store`] wraps one connection pool and is passed explicitly into every
//! component that needs it; there is no process-global handle. Schema creation
//! is idempotent and safe to run before every job.

mod facts;
mod queries;

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

const DDL: &[&str] = &[
    // Core fact table, one row per (trip, stop, sequence, service date).
    r#"
    CREATE TABLE IF NOT EXISTS stop_delay_events (
        observed_at         TEXT NOT NULL,
        trip_id             TEXT NOT NULL,
        stop_id             TEXT NOT NULL,
        stop_sequence       INTEGER NOT NULL,
        service_date        TEXT NOT NULL,
        route_id            TEXT NOT NULL,
        direction_id        INTEGER,
        vehicle_id          TEXT,
        arrival_delay       INTEGER,
        departure_delay     INTEGER,
        predicted_arrival   TEXT,
        predicted_departure TEXT,
        feed_timestamp      TEXT NOT NULL,
        hour_of_day         INTEGER NOT NULL,
        day_of_week         INTEGER NOT NULL,
        is_on_time          INTEGER,
        PRIMARY KEY (trip_id, stop_id, stop_sequence, service_date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_delay_route_date ON stop_delay_events (route_id, service_date)",
    "CREATE INDEX IF NOT EXISTS idx_delay_stop_date ON stop_delay_events (stop_id, service_date)",
    "CREATE INDEX IF NOT EXISTS idx_delay_hour ON stop_delay_events (route_id, hour_of_day)",
    r#"
    CREATE TABLE IF NOT EXISTS daily_route_summary (
        service_date         TEXT NOT NULL,
        route_id             TEXT NOT NULL,
        total_observations   INTEGER NOT NULL,
        on_time_count        INTEGER NOT NULL,
        early_count          INTEGER NOT NULL,
        late_count           INTEGER NOT NULL,
        avg_delay_seconds    REAL,
        median_delay_seconds REAL,
        p95_delay_seconds    REAL,
        max_delay_seconds    INTEGER,
        min_delay_seconds    INTEGER,
        on_time_percentage   REAL NOT NULL,
        unique_trips         INTEGER,
        unique_vehicles      INTEGER,
        unique_stops         INTEGER,
        PRIMARY KEY (service_date, route_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hourly_route_summary (
        service_date        TEXT NOT NULL,
        route_id            TEXT NOT NULL,
        hour_of_day         INTEGER NOT NULL,
        total_observations  INTEGER NOT NULL,
        on_time_count       INTEGER NOT NULL,
        avg_delay_seconds   REAL,
        on_time_percentage  REAL NOT NULL,
        PRIMARY KEY (service_date, route_id, hour_of_day)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS poll_log (
        poll_id             INTEGER PRIMARY KEY AUTOINCREMENT,
        polled_at           TEXT NOT NULL,
        trip_updates_count  INTEGER,
        fetch_duration_ms   INTEGER,
        process_duration_ms INTEGER,
        error_message       TEXT,
        trip_feed_timestamp TEXT
    )
    "#,
    // Static GTFS reference tables, presentation joins only.
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_routes (
        route_id         TEXT PRIMARY KEY,
        route_short_name TEXT,
        route_long_name  TEXT,
        route_type       INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_stops (
        stop_id   TEXT PRIMARY KEY,
        stop_name TEXT,
        stop_lat  REAL,
        stop_lon  REAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_trips (
        trip_id       TEXT PRIMARY KEY,
        route_id      TEXT,
        service_id    TEXT,
        trip_headsign TEXT,
        direction_id  INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_stop_times (
        trip_id        TEXT NOT NULL,
        stop_sequence  INTEGER NOT NULL,
        stop_id        TEXT NOT NULL,
        arrival_time   TEXT,
        departure_time TEXT,
        PRIMARY KEY (trip_id, stop_sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_calendar (
        service_id TEXT PRIMARY KEY,
        monday     INTEGER,
        tuesday    INTEGER,
        wednesday  INTEGER,
        thursday   INTEGER,
        friday     INTEGER,
        saturday   INTEGER,
        sunday     INTEGER,
        start_date TEXT,
        end_date   TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gtfs_calendar_dates (
        service_id     TEXT NOT NULL,
        date           TEXT NOT NULL,
        exception_type INTEGER,
        PRIMARY KEY (service_id, date)
    )
    "#,
];

impl Store {
    /// Opens (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;
        Ok(Self { pool })
    }

    /// In-memory database on a single-connection pool, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Creates all tables and indexes if they do not exist.
    pub async fn create_tables(&self) -> Result<()> {
        for statement in DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
