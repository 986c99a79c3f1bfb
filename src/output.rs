//! CSV persistence for scrape logs and reading exports.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::stats::IngestStats;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Appends an [`IngestStats`] record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, stats: &IngestStats) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}

/// One exported reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub timestamp: DateTime<Utc>,
    pub sensor_index: u32,
    pub sensor_name: String,
    pub speed_mph: Option<f64>,
    pub has_incident: bool,
}

/// Writes rows to a fresh CSV file, replacing any existing one.
pub fn export_readings(path: &str, rows: &[ExportRow]) -> Result<usize> {
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path, rows = rows.len(), "Exported readings");
    Ok(rows.len())
}
