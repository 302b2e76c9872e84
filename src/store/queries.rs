//! Read-only queries consumed by the dashboard and by operators.

use anyhow::Result;
use chrono::NaiveDate;

use crate::model::{DailyRouteSummary, HourlyRouteSummary, PollLogRow, RouteOtp, RouteRef};
use crate::stats::{mean, median, percentile_cont};

use super::Store;

impl Store {
    /// Daily summaries over a date range, optionally filtered to one route.
    pub async fn daily_summaries(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        route_id: Option<&str>,
    ) -> Result<Vec<DailyRouteSummary>> {
        let rows = match route_id {
            Some(route) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM daily_route_summary
                    WHERE service_date BETWEEN ? AND ? AND route_id = ?
                    ORDER BY service_date, route_id
                    "#,
                )
                .bind(start)
                .bind(end)
                .bind(route)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM daily_route_summary
                    WHERE service_date BETWEEN ? AND ?
                    ORDER BY service_date, route_id
                    "#,
                )
                .bind(start)
                .bind(end)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(rows)
    }

    /// Hourly summaries over a date range, optionally filtered to one route.
    pub async fn hourly_summaries(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        route_id: Option<&str>,
    ) -> Result<Vec<HourlyRouteSummary>> {
        let rows = match route_id {
            Some(route) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM hourly_route_summary
                    WHERE service_date BETWEEN ? AND ? AND route_id = ?
                    ORDER BY service_date, route_id, hour_of_day
                    "#,
                )
                .bind(start)
                .bind(end)
                .bind(route)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM hourly_route_summary
                    WHERE service_date BETWEEN ? AND ?
                    ORDER BY service_date, route_id, hour_of_day
                    "#,
                )
                .bind(start)
                .bind(end)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(rows)
    }

    /// All known routes, for presentation-layer dropdowns and joins.
    pub async fn routes(&self) -> Result<Vec<RouteRef>> {
        Ok(sqlx::query_as(
            "SELECT route_id, route_short_name, route_long_name FROM gtfs_routes \
             ORDER BY route_short_name",
        )
        .fetch_all(self.pool())
        .await?)
    }

    /// Minimum and maximum service date present in the daily summaries.
    pub async fn summary_date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let row: (Option<NaiveDate>, Option<NaiveDate>) = sqlx::query_as(
            "SELECT MIN(service_date), MAX(service_date) FROM daily_route_summary",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(match row {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    /// Most recent poll health rows, newest first.
    pub async fn recent_polls(&self, limit: i64) -> Result<Vec<PollLogRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM poll_log ORDER BY poll_id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?)
    }

    /// On-time performance for one route over a date range, computed from the
    /// fact table on demand.
    pub async fn route_otp(
        &self,
        route_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RouteOtp> {
        let (total, on_time): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_on_time THEN 1 ELSE 0 END), 0)
            FROM stop_delay_events
            WHERE route_id = ? AND service_date BETWEEN ? AND ?
            "#,
        )
        .bind(route_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool())
        .await?;

        let delays: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT arrival_delay FROM stop_delay_events
            WHERE route_id = ? AND service_date BETWEEN ? AND ?
              AND arrival_delay IS NOT NULL
            ORDER BY arrival_delay
            "#,
        )
        .bind(route_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        let sorted: Vec<f64> = delays.iter().map(|&d| d as f64).collect();
        let (avg, med, p95) = if sorted.is_empty() {
            (None, None, None)
        } else {
            (
                Some(mean(&sorted)),
                Some(median(&sorted)),
                Some(percentile_cont(&sorted, 0.95)),
            )
        };

        Ok(RouteOtp {
            route_id: route_id.to_string(),
            total_observations: total,
            on_time_count: on_time,
            on_time_percentage: if total > 0 {
                on_time as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_delay_seconds: avg,
            median_delay_seconds: med,
            p95_delay_seconds: p95,
        })
    }
}
