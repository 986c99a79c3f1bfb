use chrono::{DateTime, Duration, TimeZone, Utc};
use socal_traffic::analyzers::aggregate::aggregate_commute;
use socal_traffic::analyzers::types::{BucketOutcome, CommuteQuery, InsufficientData};
use socal_traffic::error::SchemaError;
use socal_traffic::ingest::normalize;
use socal_traffic::model::Direction;
use socal_traffic::parser::parse_payload;
use socal_traffic::routes::{Route, RouteSegment, resolve_route};
use socal_traffic::store::{ApplyOutcome, TrafficStore};
use socal_traffic::topology::Topology;

fn topology() -> Topology {
    Topology::from_json(include_bytes!("fixtures/static.json")).expect("Failed to load topology")
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 13, 15, 40, 0).unwrap()
}

fn ingest(
    store: &mut TrafficStore,
    topology: &Topology,
    bytes: &[u8],
    at: DateTime<Utc>,
) -> ApplyOutcome {
    let payload = parse_payload(bytes).expect("Failed to parse payload");
    let batch = normalize(&payload, topology, Some(at)).expect("Failed to normalize payload");
    store.apply(batch)
}

#[test]
fn test_topology_matches_static_payload() {
    let topology = topology();

    assert_eq!(topology.sensor_count(), 3);
    let sensor = topology.sensor(1).unwrap();
    assert_eq!(sensor.name, "Howard Hughes Pkwy");
    assert_eq!(sensor.route.as_deref(), Some("405"));
    assert_eq!(sensor.direction, Some(Direction::South));
    assert_eq!(sensor.road_section_id, Some(1));
    assert_eq!(topology.speed_limit(2), Some(65.0));

    let section = topology.section(1).unwrap();
    assert!((section.end_index as usize) < topology.sensor_count());
}

#[test]
fn test_reingesting_a_poll_is_idempotent() {
    let topology = topology();
    let mut store = TrafficStore::new();

    ingest(&mut store, &topology, include_bytes!("fixtures/live_t0.json"), t0());
    let second = ingest(&mut store, &topology, include_bytes!("fixtures/live_t0.json"), t0());

    assert_eq!(second.inserted, 0);
    assert_eq!(store.reading_count(), 3);
}

#[test]
fn test_archived_payload_reads_like_live() {
    let topology = topology();
    let live = normalize(
        &parse_payload(include_bytes!("fixtures/live_t0.json")).unwrap(),
        &topology,
        Some(t0()),
    )
    .unwrap();
    let archived = normalize(
        &parse_payload(include_bytes!("fixtures/archived_t0.json")).unwrap(),
        &topology,
        None,
    )
    .unwrap();

    assert_eq!(live.readings, archived.readings);
}

#[test]
fn test_end_to_end_commute_bucket() {
    let topology = topology();
    let mut store = TrafficStore::new();
    ingest(&mut store, &topology, include_bytes!("fixtures/live_t0.json"), t0());

    let route = resolve_route(
        &Route {
            name: "405 S".to_string(),
            period: None,
            segments: vec![RouteSegment::range("405", Direction::South, 0, 2)],
        },
        &topology,
    )
    .unwrap();
    let query = CommuteQuery::new(t0() - Duration::hours(1), t0() + Duration::hours(1));
    let report = aggregate_commute(&route, &query, &store).unwrap();

    let bucket = query.bucket_of(t0()).unwrap();
    let stats = report.bucket(bucket).unwrap().outcome.stats().unwrap();
    assert_eq!(stats.mean_speed_mph, 65.0);
    assert_eq!(stats.sample_count, 2);
    assert!(!stats.incident_adjusted);

    assert_eq!(
        report.bucket(bucket + 1).unwrap().outcome,
        BucketOutcome::NotEnoughData {
            reason: InsufficientData::NoSamples,
            reading_count: 0,
        }
    );
    assert_eq!(report.recommendations.len(), 1);
    assert_eq!(report.recommendations[0].bucket.index, bucket);
}

#[test]
fn test_incident_placeholder_is_backfilled() {
    let topology = topology();
    let t1 = t0() + Duration::minutes(2);
    let mut store = TrafficStore::new();

    let first = ingest(&mut store, &topology, include_bytes!("fixtures/incident_ref.json"), t0());
    assert_eq!(first.incidents_created, 1);
    assert!(store.incident(47601929).unwrap().is_placeholder());

    let second = ingest(&mut store, &topology, include_bytes!("fixtures/incident_record.json"), t1);
    assert_eq!(second.incidents_created, 0);
    assert_eq!(second.incidents_updated, 1);

    let incident = store.incident(47601929).unwrap();
    assert!(!incident.is_placeholder());
    assert_eq!(
        incident.detail.as_ref().unwrap().description.as_deref(),
        Some("Stalled vehicle, right lane blocked")
    );
    assert_eq!(incident.first_seen, t0());
    assert_eq!(incident.last_seen, t1);
    assert_eq!(store.incident_count(), 1);
}

#[test]
fn test_incident_bounds_ignore_processing_order() {
    let topology = topology();
    let t1 = t0() + Duration::minutes(2);
    let mut store = TrafficStore::new();

    ingest(&mut store, &topology, include_bytes!("fixtures/incident_record.json"), t1);
    ingest(&mut store, &topology, include_bytes!("fixtures/incident_ref.json"), t0());

    let incident = store.incident(47601929).unwrap();
    assert_eq!(incident.first_seen, t0());
    assert_eq!(incident.last_seen, t1);
    assert!(!incident.is_placeholder());
}

#[test]
fn test_short_payload_is_rejected_whole() {
    let topology = topology();
    let payload = parse_payload(br#"{"speeds": [[70, null, []], [65, null, []]]}"#).unwrap();

    assert!(matches!(
        normalize(&payload, &topology, Some(t0())),
        Err(SchemaError::LengthMismatch { expected: 3, actual: 2, .. })
    ));
}
