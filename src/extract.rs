//! Transformation of a decoded TripUpdates feed into stop delay observations.
//!
//! This is a pure function of the feed and the poll instant: field-presence
//! gating, service-date parsing, vehicle-id fallback, and on-time
//! classification all happen here, before anything touches the store.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use tracing::debug;

use crate::config::OtpThresholds;
use crate::gtfs_rt::FeedMessage;
use crate::model::StopDelayEvent;

/// Parses a GTFS service date token (`YYYYMMDD`, exactly 8 digits).
pub fn parse_service_date(token: &str) -> Option<NaiveDate> {
    if token.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

/// Walks a decoded feed and emits one [`StopDelayEvent`] per usable
/// (trip, stop) pair.
///
/// Gating rules, applied at the finest possible granularity:
/// - entities without a trip-update payload are skipped (feeds legitimately
///   mix update types);
/// - a trip whose descriptor lacks a trip id, a route id, or a parseable
///   service date contributes no observations at all;
/// - a stop-time update without a stop id or a stop sequence is dropped while
///   its siblings survive.
///
/// Hour-of-day and day-of-week are derived from `observed_at`, the poll's own
/// wall-clock instant, not from predicted or feed-generation time:
/// observations are bucketed by when they were sampled.
///
/// The output carries no ordering guarantee.
pub fn extract_stop_delays(
    feed: &FeedMessage,
    observed_at: DateTime<Utc>,
    thresholds: &OtpThresholds,
) -> Vec<StopDelayEvent> {
    let mut events = Vec::new();

    // Header timestamp is optional on the wire; the fact column is not.
    let feed_timestamp = feed
        .header
        .timestamp
        .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
        .unwrap_or(observed_at);

    let hour_of_day = observed_at.hour() as u8;
    let day_of_week = observed_at.weekday().num_days_from_monday() as u8;

    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };
        let trip = &trip_update.trip;

        let Some(trip_id) = trip.trip_id.as_deref() else {
            continue;
        };

        let route_id = match trip.route_id.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => {
                debug!(entity = %entity.id, "Trip update without route id, skipping trip");
                continue;
            }
        };

        let service_date = match trip.start_date.as_deref().map(parse_service_date) {
            Some(Some(d)) => d,
            _ => {
                debug!(entity = %entity.id, "Trip update without usable start date, skipping trip");
                continue;
            }
        };

        let direction_id = trip.direction_id.map(|d| d as i32);

        // Prefer the explicit vehicle id, fall back to the display label.
        let vehicle_id = trip_update
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone().or_else(|| v.label.clone()));

        for stu in &trip_update.stop_time_update {
            let stop_id = match stu.stop_id.as_deref() {
                Some(s) if !s.is_empty() => s,
                _ => continue,
            };
            let Some(stop_sequence) = stu.stop_sequence else {
                continue;
            };

            let mut arrival_delay = None;
            let mut predicted_arrival = None;
            if let Some(arrival) = &stu.arrival {
                arrival_delay = arrival.delay;
                predicted_arrival = arrival.time.and_then(|t| DateTime::from_timestamp(t, 0));
            }

            let mut departure_delay = None;
            let mut predicted_departure = None;
            if let Some(departure) = &stu.departure {
                departure_delay = departure.delay;
                predicted_departure = departure.time.and_then(|t| DateTime::from_timestamp(t, 0));
            }

            // Arrival delay takes precedence for classification.
            let delay_for_otp = arrival_delay.or(departure_delay);

            events.push(StopDelayEvent {
                observed_at,
                trip_id: trip_id.to_string(),
                stop_id: stop_id.to_string(),
                stop_sequence,
                service_date,
                route_id: route_id.to_string(),
                direction_id,
                vehicle_id: vehicle_id.clone(),
                arrival_delay,
                departure_delay,
                predicted_arrival,
                predicted_departure,
                feed_timestamp,
                hour_of_day,
                day_of_week,
                is_on_time: thresholds.classify(delay_for_otp),
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate, VehicleDescriptor,
        VehiclePosition,
    };

    fn header() -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_705_320_000),
            incrementality: None,
            feed_version: None,
        }
    }

    fn observed() -> DateTime<Utc> {
        // 2024-01-15 14:30:00 UTC, a Monday
        DateTime::from_timestamp(1_705_329_000, 0).unwrap()
    }

    fn stop_update(stop_id: &str, seq: u32, arrival_delay: Option<i32>) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_sequence: Some(seq),
            stop_id: Some(stop_id.to_string()),
            arrival: arrival_delay.map(|d| StopTimeEvent {
                delay: Some(d),
                time: None,
                uncertainty: None,
            }),
            departure: None,
            schedule_relationship: None,
        }
    }

    fn trip_entity(id: &str, update: TripUpdate) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            trip_update: Some(update),
            ..Default::default()
        }
    }

    fn basic_trip(trip_id: &str, route_id: Option<&str>, start_date: Option<&str>) -> TripUpdate {
        TripUpdate {
            trip: TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: route_id.map(str::to_string),
                start_date: start_date.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn feed(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: header(),
            entity: entities,
        }
    }

    #[test]
    fn test_parse_service_date() {
        assert_eq!(
            parse_service_date("20240115"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_service_date("2024-01-15"), None);
        assert_eq!(parse_service_date("2024115"), None);
        assert_eq!(parse_service_date("20241332"), None);
        assert_eq!(parse_service_date(""), None);
    }

    #[test]
    fn test_single_on_time_observation() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![stop_update("S1", 1, Some(120))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.trip_id, "T1");
        assert_eq!(e.route_id, "R1");
        assert_eq!(e.stop_id, "S1");
        assert_eq!(e.stop_sequence, 1);
        assert_eq!(e.service_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(e.arrival_delay, Some(120));
        assert_eq!(e.is_on_time, Some(true));
    }

    #[test]
    fn test_late_observation_is_not_on_time() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![stop_update("S1", 1, Some(400))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        assert_eq!(events[0].is_on_time, Some(false));
    }

    #[test]
    fn test_entity_without_trip_update_is_skipped() {
        let entity = FeedEntity {
            id: "v1".to_string(),
            vehicle: Some(VehiclePosition::default()),
            ..Default::default()
        };
        let events =
            extract_stop_delays(&feed(vec![entity]), observed(), &OtpThresholds::default());
        assert!(events.is_empty());
    }

    #[test]
    fn test_missing_route_id_drops_whole_trip() {
        let mut update = basic_trip("T1", None, Some("20240115"));
        update.stop_time_update = vec![stop_update("S1", 1, Some(10)), stop_update("S2", 2, Some(20))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_malformed_start_date_drops_trip_but_not_poll() {
        let mut bad = basic_trip("T1", Some("R1"), Some("not-a-date"));
        bad.stop_time_update = vec![stop_update("S1", 1, Some(10))];
        let mut good = basic_trip("T2", Some("R2"), Some("20240115"));
        good.stop_time_update = vec![stop_update("S3", 1, Some(30))];

        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", bad), trip_entity("e2", good)]),
            observed(),
            &OtpThresholds::default(),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trip_id, "T2");
    }

    #[test]
    fn test_missing_start_date_drops_trip() {
        let mut update = basic_trip("T1", Some("R1"), None);
        update.stop_time_update = vec![stop_update("S1", 1, Some(10))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_stop_update_missing_key_fields_dropped_individually() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        let no_stop_id = StopTimeUpdate {
            stop_sequence: Some(2),
            stop_id: None,
            ..Default::default()
        };
        let no_sequence = StopTimeUpdate {
            stop_sequence: None,
            stop_id: Some("S9".to_string()),
            ..Default::default()
        };
        update.stop_time_update = vec![
            stop_update("S1", 1, Some(10)),
            no_stop_id,
            no_sequence,
            stop_update("S4", 4, Some(40)),
        ];

        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        let stops: Vec<_> = events.iter().map(|e| e.stop_id.as_str()).collect();
        assert_eq!(stops, vec!["S1", "S4"]);
    }

    #[test]
    fn test_stop_sequence_zero_is_kept() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![stop_update("S0", 0, Some(5))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stop_sequence, 0);
    }

    #[test]
    fn test_vehicle_id_prefers_id_over_label() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.vehicle = Some(VehicleDescriptor {
            id: Some("veh-9".to_string()),
            label: Some("Bus 9".to_string()),
            license_plate: None,
        });
        update.stop_time_update = vec![stop_update("S1", 1, Some(0))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );
        assert_eq!(events[0].vehicle_id.as_deref(), Some("veh-9"));
    }

    #[test]
    fn test_vehicle_id_falls_back_to_label() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.vehicle = Some(VehicleDescriptor {
            id: None,
            label: Some("Bus 9".to_string()),
            license_plate: None,
        });
        update.stop_time_update = vec![stop_update("S1", 1, Some(0))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );
        assert_eq!(events[0].vehicle_id.as_deref(), Some("Bus 9"));
    }

    #[test]
    fn test_departure_delay_used_when_arrival_absent() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![StopTimeUpdate {
            stop_sequence: Some(1),
            stop_id: Some("S1".to_string()),
            arrival: None,
            departure: Some(StopTimeEvent {
                delay: Some(600),
                time: Some(1_705_330_000),
                uncertainty: None,
            }),
            schedule_relationship: None,
        }];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        let e = &events[0];
        assert_eq!(e.arrival_delay, None);
        assert_eq!(e.departure_delay, Some(600));
        assert_eq!(
            e.predicted_departure,
            DateTime::from_timestamp(1_705_330_000, 0)
        );
        // Classified from the departure delay
        assert_eq!(e.is_on_time, Some(false));
    }

    #[test]
    fn test_no_delay_leaves_classification_undefined() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![StopTimeUpdate {
            stop_sequence: Some(1),
            stop_id: Some("S1".to_string()),
            arrival: Some(StopTimeEvent {
                delay: None,
                time: Some(1_705_330_000),
                uncertainty: None,
            }),
            departure: None,
            schedule_relationship: None,
        }];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        assert_eq!(events[0].arrival_delay, None);
        assert_eq!(events[0].is_on_time, None);
    }

    #[test]
    fn test_time_buckets_come_from_poll_instant() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![stop_update("S1", 1, Some(0))];
        let events = extract_stop_delays(
            &feed(vec![trip_entity("e1", update)]),
            observed(),
            &OtpThresholds::default(),
        );

        // 2024-01-15 14:30 UTC is a Monday
        assert_eq!(events[0].hour_of_day, 14);
        assert_eq!(events[0].day_of_week, 0);
        assert_eq!(events[0].observed_at, observed());
    }

    #[test]
    fn test_feed_timestamp_falls_back_to_poll_instant() {
        let mut update = basic_trip("T1", Some("R1"), Some("20240115"));
        update.stop_time_update = vec![stop_update("S1", 1, Some(0))];
        let mut msg = feed(vec![trip_entity("e1", update)]);
        msg.header.timestamp = None;

        let events = extract_stop_delays(&msg, observed(), &OtpThresholds::default());
        assert_eq!(events[0].feed_timestamp, observed());
    }
}
