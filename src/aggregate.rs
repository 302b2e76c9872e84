//! Recomputation of daily and hourly route summaries from the fact table.
//!
//! Each run fully replaces the summary rows for its target date inside one
//! transaction: delete, recompute from the fact rows, insert. Running twice
//! for the same date yields the same rows, never duplicates. Statistics are
//! computed here rather than in SQL because SQLite has no ordered-set
//! aggregate functions; [`crate::stats`] reproduces `PERCENTILE_CONT`
//! semantics.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;
use tracing::info;

use crate::config::OtpThresholds;
use crate::model::{DailyRouteSummary, HourlyRouteSummary};
use crate::stats::{mean, median, percentile_cont};
use crate::store::Store;

/// Row counts created by one aggregation run, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub date: NaiveDate,
    pub daily_route_summaries: usize,
    pub hourly_route_summaries: usize,
}

/// The slice of a fact row the rollups need. The population is restricted to
/// rows with a known arrival delay; NULL delays never count as zero.
#[derive(Debug, FromRow)]
struct DelayFact {
    route_id: String,
    trip_id: String,
    vehicle_id: Option<String>,
    stop_id: String,
    arrival_delay: i32,
    is_on_time: Option<bool>,
    hour_of_day: u8,
}

/// Recomputes both summary tables for one service date.
///
/// Idempotent delete-then-insert inside a single transaction; a storage error
/// propagates to the caller and leaves other dates untouched.
pub async fn run_daily_aggregation(
    store: &Store,
    thresholds: &OtpThresholds,
    date: NaiveDate,
) -> Result<AggregationReport> {
    info!(date = %date, "Running daily aggregation");

    let mut tx = store.pool().begin().await?;

    sqlx::query("DELETE FROM daily_route_summary WHERE service_date = ?")
        .bind(date)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM hourly_route_summary WHERE service_date = ?")
        .bind(date)
        .execute(&mut *tx)
        .await?;

    let facts: Vec<DelayFact> = sqlx::query_as(
        r#"
        SELECT route_id, trip_id, vehicle_id, stop_id,
               arrival_delay, is_on_time, hour_of_day
        FROM stop_delay_events
        WHERE service_date = ? AND arrival_delay IS NOT NULL
        "#,
    )
    .bind(date)
    .fetch_all(&mut *tx)
    .await?;

    let daily = summarize_daily(date, &facts, thresholds);
    for row in &daily {
        sqlx::query(
            r#"
            INSERT INTO daily_route_summary (
                service_date, route_id,
                total_observations, on_time_count, early_count, late_count,
                avg_delay_seconds, median_delay_seconds, p95_delay_seconds,
                max_delay_seconds, min_delay_seconds,
                on_time_percentage, unique_trips, unique_vehicles, unique_stops
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.service_date)
        .bind(&row.route_id)
        .bind(row.total_observations)
        .bind(row.on_time_count)
        .bind(row.early_count)
        .bind(row.late_count)
        .bind(row.avg_delay_seconds)
        .bind(row.median_delay_seconds)
        .bind(row.p95_delay_seconds)
        .bind(row.max_delay_seconds)
        .bind(row.min_delay_seconds)
        .bind(row.on_time_percentage)
        .bind(row.unique_trips)
        .bind(row.unique_vehicles)
        .bind(row.unique_stops)
        .execute(&mut *tx)
        .await?;
    }

    let hourly = summarize_hourly(date, &facts);
    for row in &hourly {
        sqlx::query(
            r#"
            INSERT INTO hourly_route_summary (
                service_date, route_id, hour_of_day,
                total_observations, on_time_count, avg_delay_seconds, on_time_percentage
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.service_date)
        .bind(&row.route_id)
        .bind(row.hour_of_day)
        .bind(row.total_observations)
        .bind(row.on_time_count)
        .bind(row.avg_delay_seconds)
        .bind(row.on_time_percentage)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        date = %date,
        daily = daily.len(),
        hourly = hourly.len(),
        "Aggregation complete"
    );

    Ok(AggregationReport {
        date,
        daily_route_summaries: daily.len(),
        hourly_route_summaries: hourly.len(),
    })
}

/// Recomputes summaries for every date in `start..=end`, ascending, on one
/// shared store session.
///
/// Dates are independent: a failure stops the loop, later dates are not
/// processed, and summaries already committed for earlier dates persist.
pub async fn backfill_aggregations(
    store: &Store,
    thresholds: &OtpThresholds,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AggregationReport>> {
    let mut reports = Vec::new();
    let mut current = start;
    while current <= end {
        let report = run_daily_aggregation(store, thresholds, current)
            .await
            .with_context(|| format!("backfill failed at {current}"))?;
        reports.push(report);
        current = current.succ_opt().context("date range end overflows the calendar")?;
    }
    Ok(reports)
}

fn summarize_daily(
    date: NaiveDate,
    facts: &[DelayFact],
    thresholds: &OtpThresholds,
) -> Vec<DailyRouteSummary> {
    let mut by_route: BTreeMap<&str, Vec<&DelayFact>> = BTreeMap::new();
    for fact in facts {
        by_route.entry(&fact.route_id).or_default().push(fact);
    }

    by_route
        .into_iter()
        .map(|(route_id, rows)| {
            let mut delays: Vec<f64> = rows.iter().map(|r| r.arrival_delay as f64).collect();
            delays.sort_by(|a, b| a.total_cmp(b));

            let total = rows.len() as i64;
            let on_time = rows
                .iter()
                .filter(|r| r.is_on_time == Some(true))
                .count() as i64;
            // Boundary values sit inside the inclusive on-time window, so the
            // early/late buckets are strict.
            let early = rows
                .iter()
                .filter(|r| r.arrival_delay < thresholds.early)
                .count() as i64;
            let late = rows
                .iter()
                .filter(|r| r.arrival_delay > thresholds.late)
                .count() as i64;

            let trips: HashSet<&str> = rows.iter().map(|r| r.trip_id.as_str()).collect();
            let vehicles: HashSet<&str> =
                rows.iter().filter_map(|r| r.vehicle_id.as_deref()).collect();
            let stops: HashSet<&str> = rows.iter().map(|r| r.stop_id.as_str()).collect();

            DailyRouteSummary {
                service_date: date,
                route_id: route_id.to_string(),
                total_observations: total,
                on_time_count: on_time,
                early_count: early,
                late_count: late,
                avg_delay_seconds: mean(&delays),
                median_delay_seconds: median(&delays),
                p95_delay_seconds: percentile_cont(&delays, 0.95),
                max_delay_seconds: rows.iter().map(|r| r.arrival_delay).max().unwrap_or(0),
                min_delay_seconds: rows.iter().map(|r| r.arrival_delay).min().unwrap_or(0),
                on_time_percentage: on_time as f64 / total as f64 * 100.0,
                unique_trips: trips.len() as i64,
                unique_vehicles: vehicles.len() as i64,
                unique_stops: stops.len() as i64,
            }
        })
        .collect()
}

fn summarize_hourly(date: NaiveDate, facts: &[DelayFact]) -> Vec<HourlyRouteSummary> {
    let mut by_bucket: BTreeMap<(&str, u8), Vec<&DelayFact>> = BTreeMap::new();
    for fact in facts {
        by_bucket
            .entry((&fact.route_id, fact.hour_of_day))
            .or_default()
            .push(fact);
    }

    by_bucket
        .into_iter()
        .map(|((route_id, hour), rows)| {
            let delays: Vec<f64> = rows.iter().map(|r| r.arrival_delay as f64).collect();
            let total = rows.len() as i64;
            let on_time = rows
                .iter()
                .filter(|r| r.is_on_time == Some(true))
                .count() as i64;

            HourlyRouteSummary {
                service_date: date,
                route_id: route_id.to_string(),
                hour_of_day: hour,
                total_observations: total,
                on_time_count: on_time,
                avg_delay_seconds: mean(&delays),
                on_time_percentage: on_time as f64 / total as f64 * 100.0,
            }
        })
        .collect()
}
