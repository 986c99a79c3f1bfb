//! Append-only reading history and incident table.
//!
//! Readings are keyed by `(sensor_index, timestamp)`, so re-applying a batch
//! never duplicates a row and a sensor's history is one ordered range scan.
//! Incidents are keyed by their source id and merged last-writer-wins on
//! capture time, which makes the result independent of the order batches
//! are applied in.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::btree_map;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ingest::NormalizedBatch;
use crate::model::{Incident, IncidentObservation, Reading};

/// Read access to a sensor's reading history, as the commute aggregator
/// needs it.
pub trait ReadingHistory {
    /// Readings of `sensor_index` with `from <= timestamp < to`, oldest first.
    fn sensor_readings<'a>(
        &'a self,
        sensor_index: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Box<dyn Iterator<Item = &'a Reading> + 'a>;
}

#[derive(Debug, Default)]
pub struct TrafficStore {
    readings: BTreeMap<(u32, DateTime<Utc>), Reading>,
    incidents: HashMap<u64, Incident>,
    captures: BTreeSet<DateTime<Utc>>,
}

/// What applying one batch changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub incidents_created: usize,
    pub incidents_updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl TrafficStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the batch's readings (existing keys are left untouched) and
    /// upserts its incidents.
    pub fn apply(&mut self, batch: NormalizedBatch) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        self.captures.insert(batch.captured_at);

        for reading in batch.readings {
            match self.readings.entry((reading.sensor_index, reading.timestamp)) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(reading);
                    outcome.inserted += 1;
                }
                btree_map::Entry::Occupied(_) => outcome.duplicates += 1,
            }
        }

        for observation in batch.incidents.into_values() {
            match self.upsert_incident(observation) {
                UpsertOutcome::Created => outcome.incidents_created += 1,
                UpsertOutcome::Updated => outcome.incidents_updated += 1,
            }
        }

        outcome
    }

    /// Merges one observation into the incident table.
    ///
    /// `first_seen`/`last_seen` widen to cover the observation. Detail from an
    /// observation at least as new as the current detail overwrites the
    /// fields it carries; detail from an older observation only fills empty
    /// fields. A placeholder gains detail as soon as any observation has it.
    pub fn upsert_incident(&mut self, observation: IncidentObservation) -> UpsertOutcome {
        let seen = observation.observed_at;

        match self.incidents.entry(observation.incident_id) {
            Entry::Vacant(slot) => {
                let detail_as_of = observation.detail.as_ref().map(|_| seen);
                slot.insert(Incident {
                    id: observation.incident_id,
                    detail: observation.detail,
                    first_seen: seen,
                    last_seen: seen,
                    detail_as_of,
                });
                UpsertOutcome::Created
            }
            Entry::Occupied(mut slot) => {
                let incident = slot.get_mut();
                incident.first_seen = incident.first_seen.min(seen);
                incident.last_seen = incident.last_seen.max(seen);

                if let Some(detail) = observation.detail {
                    match (incident.detail.as_mut(), incident.detail_as_of) {
                        (Some(current), Some(as_of)) if seen < as_of => current.fill_gaps(&detail),
                        (Some(current), _) => {
                            current.overlay(&detail);
                            incident.detail_as_of = Some(seen);
                        }
                        (None, _) => {
                            incident.detail = Some(detail);
                            incident.detail_as_of = Some(seen);
                        }
                    }
                }
                UpsertOutcome::Updated
            }
        }
    }

    pub fn readings_for_sensor(
        &self,
        sensor_index: u32,
        range: Range<DateTime<Utc>>,
    ) -> impl Iterator<Item = &Reading> {
        let bounds = if range.start < range.end {
            Some((sensor_index, range.start)..(sensor_index, range.end))
        } else {
            None
        };
        bounds
            .into_iter()
            .flat_map(move |bounds| self.readings.range(bounds).map(|(_, reading)| reading))
    }

    pub fn incident(&self, id: u64) -> Option<&Incident> {
        self.incidents.get(&id)
    }

    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    pub fn reading_count(&self) -> usize {
        self.readings.len()
    }

    pub fn incident_count(&self) -> usize {
        self.incidents.len()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    /// First and last capture time, if anything was applied.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.captures.first()?, *self.captures.last()?))
    }
}

impl ReadingHistory for TrafficStore {
    fn sensor_readings<'a>(
        &'a self,
        sensor_index: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Box<dyn Iterator<Item = &'a Reading> + 'a> {
        Box::new(self.readings_for_sensor(sensor_index, from..to))
    }
}

impl ReadingHistory for [Reading] {
    fn sensor_readings<'a>(
        &'a self,
        sensor_index: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Box<dyn Iterator<Item = &'a Reading> + 'a> {
        Box::new(self.iter().filter(move |r| {
            r.sensor_index == sensor_index && r.timestamp >= from && r.timestamp < to
        }))
    }
}

/// A [`TrafficStore`] shared between ingest and analysis.
///
/// A batch is applied under a single write lock and every [`read`] holds one
/// read lock for its whole closure, so a reader sees a batch either entirely
/// or not at all.
///
/// [`read`]: SharedStore::read
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<TrafficStore>>,
}

impl SharedStore {
    pub fn new(store: TrafficStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn apply(&self, batch: NormalizedBatch) -> ApplyOutcome {
        self.write().apply(batch)
    }

    /// Runs `f` against a consistent snapshot of the store.
    pub fn read<R>(&self, f: impl FnOnce(&TrafficStore) -> R) -> R {
        f(&self.read_guard())
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, TrafficStore> {
        // A panic mid-apply cannot leave a half-inserted reading behind, so a
        // poisoned lock still guards usable data.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrafficStore> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IncidentDetail, IncidentKind, IncidentRef};
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 13, 15, 0, 0).unwrap() + Duration::minutes(minutes)
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

    fn observation(id: u64, at: DateTime<Utc>, description: Option<&str>) -> IncidentObservation {
        IncidentObservation {
            incident_id: id,
            observed_at: at,
            detail: description.map(|d| IncidentDetail {
                description: Some(d.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_reapplying_a_batch_is_idempotent() {
        let mut store = TrafficStore::new();

        let first = store.apply(batch(t(0), &[Some(70.0), None, Some(60.0)]));
        let second = store.apply(batch(t(0), &[Some(70.0), None, Some(60.0)]));

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.reading_count(), 3);
        assert_eq!(store.capture_count(), 1);
    }

    #[test]
    fn test_sensor_range_lookup() {
        let mut store = TrafficStore::new();
        for minutes in [0, 5, 10, 15] {
            store.apply(batch(t(minutes), &[Some(50.0 + minutes as f64), Some(1.0)]));
        }

        let speeds: Vec<_> = store
            .readings_for_sensor(0, t(5)..t(15))
            .map(|r| r.speed_mph.unwrap())
            .collect();
        assert_eq!(speeds, vec![55.0, 60.0]);
        assert_eq!(store.readings_for_sensor(0, t(15)..t(5)).count(), 0);
        assert_eq!(store.time_span(), Some((t(0), t(15))));
    }

    #[test]
    fn test_incident_seen_bounds_are_order_independent() {
        let mut in_order = TrafficStore::new();
        in_order.upsert_incident(observation(7, t(0), Some("Crash")));
        in_order.upsert_incident(observation(7, t(10), Some("Crash, cleared")));

        let mut reversed = TrafficStore::new();
        reversed.upsert_incident(observation(7, t(10), Some("Crash, cleared")));
        reversed.upsert_incident(observation(7, t(0), Some("Crash")));

        for store in [&in_order, &reversed] {
            let incident = store.incident(7).unwrap();
            assert_eq!(incident.first_seen, t(0));
            assert_eq!(incident.last_seen, t(10));
            assert_eq!(
                incident.detail.as_ref().unwrap().description.as_deref(),
                Some("Crash, cleared")
            );
        }
        assert_eq!(in_order.incident_count(), 1);
    }

    #[test]
    fn test_placeholder_is_backfilled_not_duplicated() {
        let mut store = TrafficStore::new();

        assert_eq!(
            store.upsert_incident(observation(47601929, t(0), None)),
            UpsertOutcome::Created
        );
        assert!(store.incident(47601929).unwrap().is_placeholder());

        assert_eq!(
            store.upsert_incident(observation(47601929, t(2), Some("Stalled vehicle"))),
            UpsertOutcome::Updated
        );

        let incident = store.incident(47601929).unwrap();
        assert!(!incident.is_placeholder());
        assert_eq!(incident.first_seen, t(0));
        assert_eq!(incident.last_seen, t(2));
        assert_eq!(store.incident_count(), 1);
    }

    #[test]
    fn test_later_placeholder_keeps_detail() {
        let mut store = TrafficStore::new();
        store.upsert_incident(observation(3, t(0), Some("Crash")));
        store.upsert_incident(observation(3, t(4), None));

        let incident = store.incident(3).unwrap();
        assert!(!incident.is_placeholder());
        assert_eq!(incident.last_seen, t(4));
    }

    #[test]
    fn test_apply_counts_incident_upserts() {
        let mut store = TrafficStore::new();
        let mut first = batch(t(0), &[Some(20.0)]);
        first.readings[0].incident_refs.push(IncidentRef {
            kind: IncidentKind::Active,
            incident_id: 9,
        });
        first.incidents.insert(9, observation(9, t(0), None));
        let mut second = batch(t(2), &[Some(25.0)]);
        second.incidents.insert(9, observation(9, t(2), Some("Crash")));

        let a = store.apply(first);
        let b = store.apply(second);

        assert_eq!(a.incidents_created, 1);
        assert_eq!(b.incidents_updated, 1);
    }

    #[test]
    fn test_slice_history_matches_store() {
        let readings = batch(t(0), &[Some(70.0), None]).readings;
        let found: Vec<_> = readings[..].sensor_readings(1, t(0), t(1)).collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].speed_mph, None);
        assert_eq!(readings[..].sensor_readings(1, t(1), t(2)).count(), 0);
    }

    #[test]
    fn test_shared_store_snapshot() {
        let shared = SharedStore::default();
        shared.apply(batch(t(0), &[Some(70.0)]));

        let clone = shared.clone();
        clone.apply(batch(t(2), &[Some(65.0)]));

        assert_eq!(shared.read(|store| store.reading_count()), 2);
    }
}
