use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DataQualityWarning;
use crate::ingest::NormalizedBatch;
use crate::store::ApplyOutcome;

/// One row of the scrape log: what a single poll produced.
#[derive(Debug, Default, Serialize)]
pub struct IngestStats {
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub total_sensors: usize,

    // readings
    pub valid_readings: usize,
    pub null_speeds: usize,
    pub defective_entries: usize,

    // incidents
    pub incidents: usize,
    pub placeholders: usize,
    pub malformed_incidents: usize,

    // store
    pub inserted: usize,
    pub duplicates: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl IngestStats {
    pub fn from_batch(batch: &NormalizedBatch, outcome: &ApplyOutcome) -> Self {
        let mut s = IngestStats {
            timestamp: batch.captured_at,
            total_sensors: batch.readings.len(),
            valid_readings: batch.valid_readings(),
            incidents: batch.incidents.len(),
            placeholders: batch.placeholder_count(),
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
            ..Default::default()
        };
        s.null_speeds = s.total_sensors - s.valid_readings;

        for warning in &batch.warnings {
            match warning {
                DataQualityWarning::DefectiveEntry { .. } => s.defective_entries += 1,
                DataQualityWarning::MalformedIncident { .. } => s.malformed_incidents += 1,
                DataQualityWarning::UnresolvedIncident { .. } => {}
            }
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn coverage_pct(&self) -> f64 {
        Self::pct(self.valid_readings, self.total_sensors)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        IngestStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}
