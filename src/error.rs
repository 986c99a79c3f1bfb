//! Error types for the topology, ingest and commute pipeline.
//!
//! Glue code (fetching, archives, S3, CLI) uses `anyhow`; the pipeline
//! returns these typed errors so callers can tell a broken payload apart
//! from a bad query.

use thiserror::Error;

/// A payload violates the array-length or index-range contract.
///
/// Fatal for the batch (or, for the static payload, for start-up). Never
/// partially applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("malformed {payload} payload: {detail}")]
    Malformed {
        payload: &'static str,
        detail: String,
    },
    #[error("`{field}` has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("`{field}` index {index} is outside [0, {len})")]
    IndexOutOfRange {
        field: String,
        index: i64,
        len: usize,
    },
    #[error("`{field}` range [{start}, {end}] is inverted")]
    InvertedRange { field: String, start: i64, end: i64 },
    #[error("`{field}` lists road section {id} more than once")]
    DuplicateSection { field: &'static str, id: u32 },
    #[error("`{field}` references unknown road section `{id}`")]
    UnknownSection { field: &'static str, id: String },
    #[error("`{field}` ranges overlap at sensor {index}")]
    OverlappingRanges { field: String, index: u32 },
    #[error("`{field}` range [{start}, {end}] leaves road section {section_id}")]
    OutsideSection {
        field: String,
        start: u32,
        end: u32,
        section_id: u32,
    },
    #[error("`{field}` has unknown direction `{value}`")]
    UnknownDirection { field: String, value: String },
    #[error("`{field}` speed limit {limit} is not a positive number")]
    InvalidSpeedLimit { field: String, limit: f64 },
    #[error("payload is neither a live nor an archived traffic payload")]
    UnrecognisedShape,
    #[error("live payload needs a capture timestamp")]
    MissingCaptureTime,
}

/// A route definition that cannot be resolved against the topology.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("route `{route}` has no segments")]
    Empty { route: String },
    #[error("route `{route}` segment {segment}: range [{start}, {end}] is outside [0, {len})")]
    OutOfRange {
        route: String,
        segment: usize,
        start: u32,
        end: u32,
        len: usize,
    },
    #[error("route `{route}` segment {segment}: range [{start}, {end}] is inverted")]
    Inverted {
        route: String,
        segment: usize,
        start: u32,
        end: u32,
    },
    #[error("route `{route}` segment {segment}: unknown road section {section_id}")]
    UnknownSection {
        route: String,
        segment: usize,
        section_id: u32,
    },
    #[error("route `{route}` segment {segment}: no sensors on {highway} {direction} in range")]
    NoSensors {
        route: String,
        segment: usize,
        highway: String,
        direction: String,
    },
    #[error("route `{0}` not found")]
    NotFound(String),
}

/// An aggregation request that cannot be answered as asked.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("window start {from} is not before window end {to}")]
    EmptyWindow { from: String, to: String },
    #[error("bucket size of {0} minutes does not divide a day")]
    InvalidBucket(u32),
    #[error("miles per sensor must be positive, got {0}")]
    InvalidSpacing(f64),
    #[error("half-life must be positive, got {0} days")]
    InvalidHalfLife(f64),
}

/// A data problem that is recorded and logged while processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataQualityWarning {
    #[error("sensor {sensor_index}: defective speed entry ({detail})")]
    DefectiveEntry { sensor_index: u32, detail: String },
    #[error("incident row {position}: {detail}")]
    MalformedIncident { position: usize, detail: String },
    #[error("incident {incident_id} is referenced but not described in this payload")]
    UnresolvedIncident { incident_id: u64 },
}
