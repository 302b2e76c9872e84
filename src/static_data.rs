//! Bulk loading of static GTFS reference tables.
//!
//! These tables are presentation join targets only; the core pipeline never
//! depends on their freshness. Each load fully replaces the previous contents
//! of a table.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetch::{HttpClient, fetch_bytes};
use crate::store::Store;

/// Rows loaded per reference table.
#[derive(Debug, Default, Serialize)]
pub struct StaticLoadCounts {
    pub routes: usize,
    pub stops: usize,
    pub trips: usize,
    pub stop_times: usize,
    pub calendar: usize,
    pub calendar_dates: usize,
}

#[derive(Debug, Deserialize)]
struct RouteRecord {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
    #[serde(default)]
    route_type: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct StopRecord {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TripRecord {
    trip_id: String,
    #[serde(default)]
    route_id: Option<String>,
    #[serde(default)]
    service_id: Option<String>,
    #[serde(default)]
    trip_headsign: Option<String>,
    #[serde(default)]
    direction_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRecord {
    trip_id: String,
    stop_sequence: u32,
    stop_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarRecord {
    service_id: String,
    #[serde(default)]
    monday: u8,
    #[serde(default)]
    tuesday: u8,
    #[serde(default)]
    wednesday: u8,
    #[serde(default)]
    thursday: u8,
    #[serde(default)]
    friday: u8,
    #[serde(default)]
    saturday: u8,
    #[serde(default)]
    sunday: u8,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarDateRecord {
    service_id: String,
    date: String,
    #[serde(default)]
    exception_type: Option<i32>,
}

/// Converts a GTFS date token (`YYYYMMDD`) for storage; `None` when absent or
/// malformed.
fn convert_gtfs_date(token: Option<&str>) -> Option<NaiveDate> {
    let token = token?;
    if token.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let record: T = result.with_context(|| format!("parsing {}", path.display()))?;
        rows.push(record);
    }
    Ok(rows)
}

/// Downloads the static GTFS zip and extracts it into `dir`.
pub async fn download_static_gtfs<C: HttpClient>(
    client: &C,
    url: &str,
    dir: &Path,
) -> Result<()> {
    info!(url, dir = %dir.display(), "Downloading static GTFS bundle");
    let bytes = fetch_bytes(client, url, Duration::from_secs(60))
        .await
        .with_context(|| format!("downloading {url}"))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating GTFS directory {}", dir.display()))?;
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("reading static GTFS zip")?;
    archive
        .extract(dir)
        .with_context(|| format!("extracting static GTFS into {}", dir.display()))?;

    info!(files = archive.len(), "Static GTFS bundle extracted");
    Ok(())
}

/// Replaces the contents of every reference table with the files found in
/// `gtfs_dir`. Missing files are skipped with a warning; a malformed file
/// fails the load.
pub async fn load_static_gtfs(store: &Store, gtfs_dir: &Path) -> Result<StaticLoadCounts> {
    let mut counts = StaticLoadCounts::default();
    let mut tx = store.pool().begin().await?;

    let routes_file = gtfs_dir.join("routes.txt");
    if routes_file.exists() {
        let rows: Vec<RouteRecord> = read_records(&routes_file)?;
        sqlx::query("DELETE FROM gtfs_routes").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_routes (route_id, route_short_name, route_long_name, route_type) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&r.route_id)
            .bind(&r.route_short_name)
            .bind(&r.route_long_name)
            .bind(r.route_type)
            .execute(&mut *tx)
            .await?;
        }
        counts.routes = rows.len();
    } else {
        warn!(path = %routes_file.display(), "routes.txt not found, skipping");
    }

    let stops_file = gtfs_dir.join("stops.txt");
    if stops_file.exists() {
        let rows: Vec<StopRecord> = read_records(&stops_file)?;
        sqlx::query("DELETE FROM gtfs_stops").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_stops (stop_id, stop_name, stop_lat, stop_lon) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&r.stop_id)
            .bind(&r.stop_name)
            .bind(r.stop_lat)
            .bind(r.stop_lon)
            .execute(&mut *tx)
            .await?;
        }
        counts.stops = rows.len();
    }

    let trips_file = gtfs_dir.join("trips.txt");
    if trips_file.exists() {
        let rows: Vec<TripRecord> = read_records(&trips_file)?;
        sqlx::query("DELETE FROM gtfs_trips").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_trips (trip_id, route_id, service_id, trip_headsign, direction_id) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&r.trip_id)
            .bind(&r.route_id)
            .bind(&r.service_id)
            .bind(&r.trip_headsign)
            .bind(r.direction_id)
            .execute(&mut *tx)
            .await?;
        }
        counts.trips = rows.len();
    }

    let stop_times_file = gtfs_dir.join("stop_times.txt");
    if stop_times_file.exists() {
        let rows: Vec<StopTimeRecord> = read_records(&stop_times_file)?;
        sqlx::query("DELETE FROM gtfs_stop_times").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_stop_times (trip_id, stop_sequence, stop_id, arrival_time, departure_time) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&r.trip_id)
            .bind(r.stop_sequence)
            .bind(&r.stop_id)
            .bind(&r.arrival_time)
            .bind(&r.departure_time)
            .execute(&mut *tx)
            .await?;
        }
        counts.stop_times = rows.len();
    }

    let calendar_file = gtfs_dir.join("calendar.txt");
    if calendar_file.exists() {
        let rows: Vec<CalendarRecord> = read_records(&calendar_file)?;
        sqlx::query("DELETE FROM gtfs_calendar").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_calendar (\
                    service_id, monday, tuesday, wednesday, thursday, \
                    friday, saturday, sunday, start_date, end_date\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&r.service_id)
            .bind(r.monday != 0)
            .bind(r.tuesday != 0)
            .bind(r.wednesday != 0)
            .bind(r.thursday != 0)
            .bind(r.friday != 0)
            .bind(r.saturday != 0)
            .bind(r.sunday != 0)
            .bind(convert_gtfs_date(r.start_date.as_deref()))
            .bind(convert_gtfs_date(r.end_date.as_deref()))
            .execute(&mut *tx)
            .await?;
        }
        counts.calendar = rows.len();
    }

    let calendar_dates_file = gtfs_dir.join("calendar_dates.txt");
    if calendar_dates_file.exists() {
        let rows: Vec<CalendarDateRecord> = read_records(&calendar_dates_file)?;
        sqlx::query("DELETE FROM gtfs_calendar_dates").execute(&mut *tx).await?;
        for r in &rows {
            sqlx::query(
                "INSERT INTO gtfs_calendar_dates (service_id, date, exception_type) \
                 VALUES (?, ?, ?)",
            )
            .bind(&r.service_id)
            .bind(convert_gtfs_date(Some(&r.date)))
            .bind(r.exception_type)
            .execute(&mut *tx)
            .await?;
        }
        counts.calendar_dates = rows.len();
    }

    tx.commit().await?;

    info!(
        routes = counts.routes,
        stops = counts.stops,
        trips = counts.trips,
        stop_times = counts.stop_times,
        calendar = counts.calendar,
        calendar_dates = counts.calendar_dates,
        "Static GTFS reference tables loaded"
    );
    Ok(counts)
}
