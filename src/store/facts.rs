//! Fact-table writes: delay event upserts and the append-only poll log.

use anyhow::Result;

use crate::model::{PollHealthRecord, StopDelayEvent};

use super::Store;

impl Store {
    /// Upserts delay events by their natural key.
    ///
    /// Repeated polls of the same (trip, stop, sequence, date) converge to the
    /// latest observation; the fact table never holds prediction history.
    pub async fn upsert_stop_delay_events(&self, events: &[StopDelayEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        for e in events {
            sqlx::query(
                r#"
                INSERT INTO stop_delay_events (
                    observed_at, trip_id, stop_id, stop_sequence, service_date,
                    route_id, direction_id, vehicle_id, arrival_delay, departure_delay,
                    predicted_arrival, predicted_departure, feed_timestamp,
                    hour_of_day, day_of_week, is_on_time
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(trip_id, stop_id, stop_sequence, service_date) DO UPDATE SET
                    observed_at = excluded.observed_at,
                    route_id = excluded.route_id,
                    direction_id = excluded.direction_id,
                    vehicle_id = excluded.vehicle_id,
                    arrival_delay = excluded.arrival_delay,
                    departure_delay = excluded.departure_delay,
                    predicted_arrival = excluded.predicted_arrival,
                    predicted_departure = excluded.predicted_departure,
                    feed_timestamp = excluded.feed_timestamp,
                    hour_of_day = excluded.hour_of_day,
                    day_of_week = excluded.day_of_week,
                    is_on_time = excluded.is_on_time
                "#,
            )
            .bind(e.observed_at)
            .bind(&e.trip_id)
            .bind(&e.stop_id)
            .bind(e.stop_sequence)
            .bind(e.service_date)
            .bind(&e.route_id)
            .bind(e.direction_id)
            .bind(&e.vehicle_id)
            .bind(e.arrival_delay)
            .bind(e.departure_delay)
            .bind(e.predicted_arrival)
            .bind(e.predicted_departure)
            .bind(e.feed_timestamp)
            .bind(e.hour_of_day)
            .bind(e.day_of_week)
            .bind(e.is_on_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(events.len())
    }

    /// Appends one poll health row. Rows are never updated or deleted.
    pub async fn log_poll(&self, record: &PollHealthRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO poll_log (
                polled_at, trip_updates_count, fetch_duration_ms,
                process_duration_ms, error_message, trip_feed_timestamp
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.polled_at)
        .bind(record.trip_updates_count)
        .bind(record.fetch_duration_ms)
        .bind(record.process_duration_ms)
        .bind(&record.error_message)
        .bind(record.trip_feed_timestamp)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
