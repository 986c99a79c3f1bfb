//! Reading ingest and normalization.
//!
//! Turns one decoded payload plus the topology into a [`NormalizedBatch`]:
//! one [`Reading`] per sensor and one [`IncidentObservation`] per incident
//! the payload describes or references. Live and archived payloads go
//! through the same path and yield identical readings for the same data.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::{debug, warn};

use crate::error::{DataQualityWarning, SchemaError};
use crate::model::{IncidentObservation, IncidentRef, Reading};
use crate::parser::Payload;
use crate::payload::{ArchivedPayload, IncidentEntry, LivePayload, SpeedEntry};
use crate::topology::Topology;

/// Everything one poll contributes to the store.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub captured_at: DateTime<Utc>,
    /// Exactly one reading per sensor, in sensor order.
    pub readings: Vec<Reading>,
    /// Every incident described or referenced in the payload, keyed by id.
    /// Referenced-only incidents are placeholders.
    pub incidents: BTreeMap<u64, IncidentObservation>,
    pub warnings: Vec<DataQualityWarning>,
}

impl NormalizedBatch {
    /// Resolves a reading's reference. Always `Some` for references produced
    /// by this batch.
    pub fn resolve(&self, incident_ref: &IncidentRef) -> Option<&IncidentObservation> {
        self.incidents.get(&incident_ref.incident_id)
    }

    pub fn incidents_for<'a>(
        &'a self,
        reading: &'a Reading,
    ) -> impl Iterator<Item = &'a IncidentObservation> + 'a {
        reading.incident_refs.iter().filter_map(|r| self.resolve(r))
    }

    pub fn valid_readings(&self) -> usize {
        self.readings.iter().filter(|r| r.speed_mph.is_some()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.incidents.values().filter(|o| o.is_placeholder()).count()
    }
}

/// Normalizes either payload shape. Live payloads carry no timestamp of their
/// own, so `captured_at` is required for them; archived payloads use theirs.
pub fn normalize(
    payload: &Payload,
    topology: &Topology,
    captured_at: Option<DateTime<Utc>>,
) -> Result<NormalizedBatch, SchemaError> {
    match payload {
        Payload::Live(live) => {
            let captured_at = captured_at.ok_or(SchemaError::MissingCaptureTime)?;
            normalize_live(live, topology, captured_at)
        }
        Payload::Archived(archived) => normalize_archived(archived, topology),
    }
}

pub fn normalize_live(
    live: &LivePayload,
    topology: &Topology,
    captured_at: DateTime<Utc>,
) -> Result<NormalizedBatch, SchemaError> {
    build_batch(
        live.speeds.iter().map(|e| &e.0).collect(),
        live.incidents.iter().map(|row| &row.0),
        topology,
        captured_at,
    )
}

pub fn normalize_archived(
    archived: &ArchivedPayload,
    topology: &Topology,
) -> Result<NormalizedBatch, SchemaError> {
    build_batch(
        archived.speeds.iter().map(|e| &e.0).collect(),
        archived.incidents.iter().map(|row| &row.0),
        topology,
        archived.captured_at,
    )
}

fn build_batch<'a>(
    speeds: Vec<&'a SpeedEntry>,
    incident_rows: impl Iterator<Item = &'a IncidentEntry>,
    topology: &Topology,
    captured_at: DateTime<Utc>,
) -> Result<NormalizedBatch, SchemaError> {
    if speeds.len() != topology.sensor_count() {
        return Err(SchemaError::LengthMismatch {
            field: "speeds",
            expected: topology.sensor_count(),
            actual: speeds.len(),
        });
    }

    let mut warnings = Vec::new();
    let mut incidents = BTreeMap::new();

    for (position, row) in incident_rows.enumerate() {
        match row {
            IncidentEntry::Record(record) => match incidents.entry(record.incident_id) {
                Entry::Vacant(slot) => {
                    slot.insert(IncidentObservation {
                        incident_id: record.incident_id,
                        observed_at: captured_at,
                        detail: Some(record.detail.clone()),
                    });
                }
                Entry::Occupied(mut slot) => {
                    let observation: &mut IncidentObservation = slot.get_mut();
                    if let Some(detail) = observation.detail.as_mut() {
                        detail.overlay(&record.detail);
                    }
                }
            },
            IncidentEntry::Malformed(detail) => {
                warnings.push(DataQualityWarning::MalformedIncident {
                    position,
                    detail: detail.clone(),
                });
            }
        }
    }

    let mut readings = Vec::with_capacity(speeds.len());
    for (i, entry) in speeds.into_iter().enumerate() {
        let sensor_index = i as u32;

        if let Some(detail) = &entry.defect {
            warnings.push(DataQualityWarning::DefectiveEntry {
                sensor_index,
                detail: detail.clone(),
            });
        }

        for incident_ref in &entry.incident_refs {
            if let Entry::Vacant(slot) = incidents.entry(incident_ref.incident_id) {
                warnings.push(DataQualityWarning::UnresolvedIncident {
                    incident_id: incident_ref.incident_id,
                });
                slot.insert(IncidentObservation {
                    incident_id: incident_ref.incident_id,
                    observed_at: captured_at,
                    detail: None,
                });
            }
        }

        readings.push(Reading {
            sensor_index,
            timestamp: captured_at,
            speed_mph: entry.speed_mph,
            incident_refs: entry.incident_refs.clone(),
        });
    }

    let batch = NormalizedBatch {
        captured_at,
        readings,
        incidents,
        warnings,
    };

    for warning in &batch.warnings {
        debug!(%warning, "Data quality warning");
    }
    if !batch.warnings.is_empty() {
        warn!(
            captured_at = %captured_at,
            warnings = batch.warnings.len(),
            "Batch normalized with data quality warnings"
        );
    }
    debug!(
        captured_at = %captured_at,
        valid = batch.valid_readings(),
        total = batch.readings.len(),
        incidents = batch.incidents.len(),
        "Batch normalized"
    );

    Ok(batch)
}
