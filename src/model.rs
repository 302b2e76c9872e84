//! Record types shared between the extractor, the store, and the aggregation
//! engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// One stop-level delay observation, sampled at one poll instant.
///
/// The natural key is (trip_id, stop_id, stop_sequence, service_date); a later
/// poll carrying the same key replaces the row, so the fact table always holds
/// the most recently observed prediction, not a history of predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopDelayEvent {
    pub observed_at: DateTime<Utc>,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub service_date: NaiveDate,
    pub route_id: String,
    pub direction_id: Option<i32>,
    pub vehicle_id: Option<String>,
    pub arrival_delay: Option<i32>,
    pub departure_delay: Option<i32>,
    pub predicted_arrival: Option<DateTime<Utc>>,
    pub predicted_departure: Option<DateTime<Utc>>,
    pub feed_timestamp: DateTime<Utc>,
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub is_on_time: Option<bool>,
}

/// Health record for one poll cycle, appended to the poll log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollHealthRecord {
    pub polled_at: DateTime<Utc>,
    pub trip_updates_count: Option<i64>,
    pub fetch_duration_ms: Option<i64>,
    pub process_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub trip_feed_timestamp: Option<DateTime<Utc>>,
}

/// A poll log row as read back for health monitoring.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PollLogRow {
    pub poll_id: i64,
    pub polled_at: DateTime<Utc>,
    pub trip_updates_count: Option<i64>,
    pub fetch_duration_ms: Option<i64>,
    pub process_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub trip_feed_timestamp: Option<DateTime<Utc>>,
}

/// Daily rollup of delay observations for one (service date, route) pair.
///
/// Fully replaced on each aggregation run for its date.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyRouteSummary {
    pub service_date: NaiveDate,
    pub route_id: String,
    pub total_observations: i64,
    pub on_time_count: i64,
    pub early_count: i64,
    pub late_count: i64,
    pub avg_delay_seconds: f64,
    pub median_delay_seconds: f64,
    pub p95_delay_seconds: f64,
    pub max_delay_seconds: i32,
    pub min_delay_seconds: i32,
    pub on_time_percentage: f64,
    pub unique_trips: i64,
    pub unique_vehicles: i64,
    pub unique_stops: i64,
}

/// Hourly rollup for one (service date, route, hour-of-day) bucket.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HourlyRouteSummary {
    pub service_date: NaiveDate,
    pub route_id: String,
    pub hour_of_day: u8,
    pub total_observations: i64,
    pub on_time_count: i64,
    pub avg_delay_seconds: f64,
    pub on_time_percentage: f64,
}

/// Reference row joined in by the presentation layer for readable names.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RouteRef {
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
}

/// On-time performance for one route over a date range, computed on demand
/// from the fact table.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOtp {
    pub route_id: String,
    pub total_observations: i64,
    pub on_time_count: i64,
    pub on_time_percentage: f64,
    pub avg_delay_seconds: Option<f64>,
    pub median_delay_seconds: Option<f64>,
    pub p95_delay_seconds: Option<f64>,
}
