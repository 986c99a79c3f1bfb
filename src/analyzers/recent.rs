//! Short-window views over the store: slow sensors, fresh incidents, data
//! volume and the live travel time of commute routes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::analyzers::utility::mean;
use crate::model::{Direction, Incident};
use crate::routes::{ResolvedRoute, Route, resolve_route};
use crate::store::{ReadingHistory, SharedStore, TrafficStore};
use crate::topology::Topology;

/// A sensor whose mean speed over the window is below the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slowdown {
    pub sensor_index: u32,
    pub sensor_name: String,
    pub route: Option<String>,
    pub direction: Option<Direction>,
    pub mean_speed_mph: f64,
    pub sample_count: usize,
}

/// Sensors averaging below `threshold_mph` over `[from, to)`, slowest first.
/// Null readings are ignored; a sensor with no samples is never slow.
pub fn find_slowdowns(
    topology: &Topology,
    store: &TrafficStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    threshold_mph: f64,
) -> Vec<Slowdown> {
    let mut slowdowns: Vec<Slowdown> = topology
        .sensors()
        .iter()
        .filter_map(|sensor| {
            let speeds: Vec<f64> = store
                .readings_for_sensor(sensor.index, from..to)
                .filter_map(|r| r.speed_mph)
                .collect();
            if speeds.is_empty() {
                return None;
            }
            let mean_speed_mph = mean(&speeds);
            (mean_speed_mph < threshold_mph).then(|| Slowdown {
                sensor_index: sensor.index,
                sensor_name: sensor.name.clone(),
                route: sensor.route.clone(),
                direction: sensor.direction,
                mean_speed_mph,
                sample_count: speeds.len(),
            })
        })
        .collect();

    slowdowns.sort_by(|a, b| {
        a.mean_speed_mph
            .total_cmp(&b.mean_speed_mph)
            .then_with(|| a.sensor_index.cmp(&b.sensor_index))
    });
    slowdowns
}

fn start_time(incident: &Incident) -> Option<DateTime<Utc>> {
    let iso = incident.detail.as_ref()?.start_time_iso.as_deref()?;
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Incidents first seen at or after `since`, newest reported start first.
/// Incidents without a parseable start time follow, newest first seen first.
pub fn recent_incidents(store: &TrafficStore, since: DateTime<Utc>) -> Vec<&Incident> {
    let mut incidents: Vec<&Incident> = store
        .incidents()
        .filter(|incident| incident.first_seen >= since)
        .collect();

    incidents.sort_by(|a, b| {
        let by_start = match (start_time(a), start_time(b)) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_start
            .then_with(|| b.first_seen.cmp(&a.first_seen))
            .then_with(|| a.id.cmp(&b.id))
    });
    incidents
}

/// Volume of collected data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStats {
    pub total_readings: usize,
    pub capture_count: usize,
    pub first_capture: Option<DateTime<Utc>>,
    pub last_capture: Option<DateTime<Utc>>,
    pub sensor_count: usize,
    pub incident_count: usize,
    /// Readings over the covered span, which counts as at least one hour.
    pub readings_per_hour: Option<u64>,
}

pub fn data_stats(topology: &Topology, store: &TrafficStore) -> DataStats {
    let span = store.time_span();
    let total_readings = store.reading_count();
    let readings_per_hour = span.map(|(first, last)| {
        let hours = ((last - first).num_seconds() as f64 / 3600.0).max(1.0);
        (total_readings as f64 / hours) as u64
    });

    DataStats {
        total_readings,
        capture_count: store.capture_count(),
        first_capture: span.map(|(first, _)| first),
        last_capture: span.map(|(_, last)| last),
        sensor_count: topology.sensor_count(),
        incident_count: store.incident_count(),
        readings_per_hour,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStatus {
    pub label: String,
    pub sensor_count: usize,
    /// Sensors with at least one sample in the window.
    pub reporting_sensors: usize,
    pub travel_minutes: Option<f64>,
    pub mean_speed_mph: Option<f64>,
    pub slowest_sensor_mph: Option<f64>,
}

/// Current state of one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStatus {
    pub route: String,
    /// `None` when any segment has neither samples nor a speed limit.
    pub travel_minutes: Option<f64>,
    pub mean_speed_mph: Option<f64>,
    pub slowest_sensor_mph: Option<f64>,
    pub segments: Vec<SegmentStatus>,
}

/// Travel time of `route` from each sensor's mean speed over `[from, to)`.
///
/// A sensor without samples takes the mean of its segment's reporting
/// sensors, or the segment's free-flow speed when none report.
pub fn route_status<H: ReadingHistory + ?Sized>(
    route: &ResolvedRoute,
    history: &H,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    miles_per_sensor: f64,
) -> RouteStatus {
    let mut all_speeds = Vec::new();

    let segments: Vec<SegmentStatus> = route
        .segments
        .iter()
        .map(|segment| {
            let sensor_means: Vec<Option<f64>> = segment
                .sensors
                .iter()
                .map(|&sensor| {
                    let speeds: Vec<f64> = history
                        .sensor_readings(sensor, from, to)
                        .filter_map(|r| r.speed_mph)
                        .collect();
                    all_speeds.extend_from_slice(&speeds);
                    (!speeds.is_empty()).then(|| mean(&speeds))
                })
                .collect();

            let reporting: Vec<f64> = sensor_means.iter().flatten().copied().collect();
            let mean_speed_mph = (!reporting.is_empty()).then(|| mean(&reporting));
            let travel_minutes = mean_speed_mph.or(segment.free_flow_mph).map(|fallback| {
                sensor_means
                    .iter()
                    .map(|speed| miles_per_sensor * 60.0 / speed.unwrap_or(fallback))
                    .sum::<f64>()
            });

            SegmentStatus {
                label: segment.label.clone(),
                sensor_count: segment.sensors.len(),
                reporting_sensors: reporting.len(),
                travel_minutes,
                mean_speed_mph,
                slowest_sensor_mph: reporting.iter().copied().reduce(f64::min),
            }
        })
        .collect();

    RouteStatus {
        route: route.name.clone(),
        travel_minutes: segments.iter().map(|s| s.travel_minutes).sum(),
        mean_speed_mph: (!all_speeds.is_empty()).then(|| mean(&all_speeds)),
        slowest_sensor_mph: segments.iter().filter_map(|s| s.slowest_sensor_mph).reduce(f64::min),
        segments,
    }
}

/// Status of every route against one snapshot, quickest first; routes
/// without a travel time come last.
pub fn current_status(
    topology: &Topology,
    store: &SharedStore,
    routes: &[Route],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    miles_per_sensor: f64,
) -> Result<Vec<RouteStatus>> {
    let resolved = routes
        .iter()
        .map(|route| resolve_route(route, topology))
        .collect::<Result<Vec<_>, _>>()?;

    let mut statuses: Vec<RouteStatus> = store.read(|snapshot| {
        resolved
            .iter()
            .map(|route| route_status(route, snapshot, from, to, miles_per_sensor))
            .collect()
    });

    statuses.sort_by(|a, b| match (a.travel_minutes, b.travel_minutes) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::NormalizedBatch;
    use crate::model::{IncidentDetail, IncidentObservation, Reading};
    use crate::routes::{ResolvedSegment, RouteSegment};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 13, 15, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn topology() -> Topology {
        Topology::from_json(
            &serde_json::to_vec(&json!({
                "sensorNames": ["A", "B", "C", "D"],
                "sensorPositions": [[0, 0, 0, 0], [1, 0, 0, 0], [2, 0, 0, 0], [3, 0, 0, 0]],
                "roadSections": [[1, "South", "405", 0, 3]],
                "roads": {"1": ["405", 0, 0, [[0, 3, 60]]]}
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn batch(at: DateTime<Utc>, speeds: &[Option<f64>]) -> NormalizedBatch {
        NormalizedBatch {
            captured_at: at,
            readings: speeds
                .iter()
                .enumerate()
                .map(|(i, speed)| Reading {
                    sensor_index: i as u32,
                    timestamp: at,
                    speed_mph: *speed,
                    incident_refs: Vec::new(),
                })
                .collect(),
            incidents: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    fn store() -> TrafficStore {
        let mut store = TrafficStore::new();
        store.apply(batch(t(0), &[Some(20.0), Some(30.0), None, Some(65.0)]));
        store.apply(batch(t(5), &[Some(10.0), Some(10.0), None, Some(70.0)]));
        store
    }

    fn incident(id: u64, seen: DateTime<Utc>, start: Option<&str>) -> IncidentObservation {
        IncidentObservation {
            incident_id: id,
            observed_at: seen,
            detail: Some(IncidentDetail {
                start_time_iso: start.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_find_slowdowns_orders_slowest_first() {
        let slowdowns = find_slowdowns(&topology(), &store(), t(0), t(10), 25.0);

        let found: Vec<(u32, f64)> = slowdowns
            .iter()
            .map(|s| (s.sensor_index, s.mean_speed_mph))
            .collect();
        assert_eq!(found, vec![(0, 15.0), (1, 20.0)]);
        assert_eq!(slowdowns[0].sample_count, 2);
        assert_eq!(slowdowns[0].route.as_deref(), Some("405"));
    }

    #[test]
    fn test_find_slowdowns_respects_window() {
        let slowdowns = find_slowdowns(&topology(), &store(), t(0), t(5), 25.0);

        assert_eq!(slowdowns.len(), 1);
        assert_eq!(slowdowns[0].mean_speed_mph, 20.0);
    }

    #[test]
    fn test_recent_incidents_newest_start_first() {
        let mut store = TrafficStore::new();
        store.upsert_incident(incident(1, t(0), Some("2026-01-13T14:00:00Z")));
        store.upsert_incident(incident(2, t(10), Some("2026-01-13T15:05:00Z")));
        store.upsert_incident(incident(3, t(20), None));
        store.upsert_incident(incident(4, t(-120), Some("2026-01-13T12:00:00Z")));

        let ids: Vec<u64> = recent_incidents(&store, t(-60))
            .iter()
            .map(|i| i.id)
            .collect();

        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_data_stats() {
        let stats = data_stats(&topology(), &store());

        assert_eq!(stats.total_readings, 8);
        assert_eq!(stats.capture_count, 2);
        assert_eq!(stats.first_capture, Some(t(0)));
        assert_eq!(stats.last_capture, Some(t(5)));
        assert_eq!(stats.sensor_count, 4);
        // Five minutes of data counts as one hour.
        assert_eq!(stats.readings_per_hour, Some(8));

        let empty = data_stats(&topology(), &TrafficStore::new());
        assert_eq!(empty.readings_per_hour, None);
        assert_eq!(empty.first_capture, None);
    }

    #[test]
    fn test_route_status_fills_silent_sensors() {
        let route = ResolvedRoute {
            name: "405 S".to_string(),
            segments: vec![ResolvedSegment {
                label: "405 South".to_string(),
                sensors: vec![1, 2],
                free_flow_mph: Some(60.0),
            }],
        };

        let status = route_status(&route, &store(), t(0), t(10), 0.5);

        // Sensor 1 averages 20 mph; sensor 2 has only nulls and takes 20 too.
        assert_eq!(status.travel_minutes, Some(3.0));
        assert_eq!(status.mean_speed_mph, Some(20.0));
        assert_eq!(status.slowest_sensor_mph, Some(20.0));
        assert_eq!(status.segments[0].reporting_sensors, 1);
    }

    #[test]
    fn test_route_status_without_data_or_limit() {
        let route = ResolvedRoute {
            name: "unknown".to_string(),
            segments: vec![ResolvedSegment {
                label: "gap".to_string(),
                sensors: vec![2],
                free_flow_mph: None,
            }],
        };

        let status = route_status(&route, &store(), t(0), t(10), 0.5);

        assert_eq!(status.travel_minutes, None);
        assert_eq!(status.mean_speed_mph, None);
    }

    #[test]
    fn test_current_status_sorts_by_travel_time() {
        let topology = topology();
        let shared = SharedStore::new(store());
        let routes = vec![
            Route {
                name: "slow".to_string(),
                period: None,
                segments: vec![RouteSegment::range("405", Direction::South, 0, 1)],
            },
            Route {
                name: "fast".to_string(),
                period: None,
                segments: vec![RouteSegment::range("405", Direction::South, 3, 3)],
            },
        ];

        let statuses = current_status(&topology, &shared, &routes, t(0), t(10), 0.5).unwrap();

        let names: Vec<&str> = statuses.iter().map(|s| s.route.as_str()).collect();
        assert_eq!(names, vec!["fast", "slow"]);
    }
}
