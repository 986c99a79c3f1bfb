//! Domain records shared by the topology, ingest, store and analyzers.
//!
//! Everything here is a named record; the positional arrays of the source
//! API never travel past the `payload` module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Travel direction of a road section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Parses the source's direction text: a full word or its first letter,
    /// in any case.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "north" | "n" | "nb" => Some(Direction::North),
            "south" | "s" | "sb" => Some(Direction::South),
            "east" | "e" | "eb" => Some(Direction::East),
            "west" | "w" | "wb" => Some(Direction::West),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::South => "South",
            Direction::East => "East",
            Direction::West => "West",
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Direction::parse(&value).ok_or_else(|| format!("unknown direction `{value}`"))
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four numbers the static payload gives for each sensor's map position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorPosition(pub [f64; 4]);

/// One traffic measurement point. Immutable once the topology is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub index: u32,
    pub name: String,
    pub position: SensorPosition,
    pub road_section_id: Option<u32>,
    pub direction: Option<Direction>,
    pub route: Option<String>,
    pub speed_limit_mph: Option<f64>,
}

/// Inclusive `[start_index, end_index]` sub-range of a section with a known limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedLimitRange {
    pub start_index: u32,
    pub end_index: u32,
    pub limit_mph: f64,
}

impl SpeedLimitRange {
    pub fn contains(&self, index: u32) -> bool {
        self.start_index <= index && index <= self.end_index
    }
}

/// A contiguous directional highway segment covering an inclusive sensor range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadSection {
    pub id: u32,
    pub direction: Direction,
    pub route: String,
    pub start_index: u32,
    pub end_index: u32,
    pub speed_limits: Vec<SpeedLimitRange>,
}

impl RoadSection {
    pub fn contains(&self, index: u32) -> bool {
        self.start_index <= index && index <= self.end_index
    }

    pub fn sensor_count(&self) -> usize {
        (self.end_index - self.start_index + 1) as usize
    }

    /// Limit of the sub-range bracketing `index`, if any.
    pub fn speed_limit_at(&self, index: u32) -> Option<f64> {
        if !self.contains(index) {
            return None;
        }
        self.speed_limits
            .iter()
            .find(|range| range.contains(index))
            .map(|range| range.limit_mph)
    }
}

/// Type code of a reading's incident reference. Code `1` marks an active incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum IncidentKind {
    Active,
    Other(i64),
}

impl IncidentKind {
    pub fn code(&self) -> i64 {
        match self {
            IncidentKind::Active => 1,
            IncidentKind::Other(code) => *code,
        }
    }
}

impl From<i64> for IncidentKind {
    fn from(code: i64) -> Self {
        if code == 1 {
            IncidentKind::Active
        } else {
            IncidentKind::Other(code)
        }
    }
}

impl From<IncidentKind> for i64 {
    fn from(kind: IncidentKind) -> Self {
        kind.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentRef {
    pub kind: IncidentKind,
    pub incident_id: u64,
}

impl IncidentRef {
    pub fn is_active(&self) -> bool {
        self.kind == IncidentKind::Active
    }
}

/// One observation of one sensor at one capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub sensor_index: u32,
    pub timestamp: DateTime<Utc>,
    /// `None` means the source had no data; never treat it as zero.
    pub speed_mph: Option<f64>,
    pub incident_refs: Vec<IncidentRef>,
}

impl Reading {
    pub fn has_active_incident(&self) -> bool {
        self.incident_refs.iter().any(IncidentRef::is_active)
    }
}

/// Source-reported incident fields. Archived payloads carry only a subset,
/// so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncidentDetail {
    pub road_section_id: Option<u32>,
    pub reported_time_text: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub severity: Option<i64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub start_time_iso: Option<String>,
    pub update_time_iso: Option<String>,
}

macro_rules! for_each_detail_field {
    ($mac:ident) => {
        $mac!(road_section_id);
        $mac!(reported_time_text);
        $mac!(location);
        $mac!(description);
        $mac!(severity);
        $mac!(x);
        $mac!(y);
        $mac!(start_time_iso);
        $mac!(update_time_iso);
    };
}

impl IncidentDetail {
    /// Copies every field present in `newer` over this one.
    pub fn overlay(&mut self, newer: &IncidentDetail) {
        macro_rules! take_newer {
            ($field:ident) => {
                if newer.$field.is_some() {
                    self.$field = newer.$field.clone();
                }
            };
        }
        for_each_detail_field!(take_newer);
    }

    /// Fills only the fields still missing here from `older`.
    pub fn fill_gaps(&mut self, older: &IncidentDetail) {
        macro_rules! fill_missing {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = older.$field.clone();
                }
            };
        }
        for_each_detail_field!(fill_missing);
    }
}

/// An incident as seen in one batch: either described by the payload or only
/// referenced by a reading (`detail == None`, a placeholder).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentObservation {
    pub incident_id: u64,
    pub observed_at: DateTime<Utc>,
    pub detail: Option<IncidentDetail>,
}

impl IncidentObservation {
    pub fn is_placeholder(&self) -> bool {
        self.detail.is_none()
    }
}

/// A traffic event as persisted across polls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: u64,
    pub detail: Option<IncidentDetail>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Capture time of the newest observation that carried detail.
    #[serde(skip)]
    pub detail_as_of: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_placeholder(&self) -> bool {
        self.detail.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse_variants() {
        assert_eq!(Direction::parse("South"), Some(Direction::South));
        assert_eq!(Direction::parse("n"), Some(Direction::North));
        assert_eq!(Direction::parse(" EAST "), Some(Direction::East));
        assert_eq!(Direction::parse("WB"), Some(Direction::West));
        assert_eq!(Direction::parse("up"), None);
    }

    #[test]
    fn test_incident_kind_codes() {
        assert_eq!(IncidentKind::from(1), IncidentKind::Active);
        assert_eq!(IncidentKind::from(3), IncidentKind::Other(3));
        assert_eq!(IncidentKind::Other(3).code(), 3);
    }

    #[test]
    fn test_section_speed_limit_lookup() {
        let section = RoadSection {
            id: 7,
            direction: Direction::South,
            route: "405".to_string(),
            start_index: 10,
            end_index: 20,
            speed_limits: vec![
                SpeedLimitRange {
                    start_index: 10,
                    end_index: 14,
                    limit_mph: 65.0,
                },
                SpeedLimitRange {
                    start_index: 17,
                    end_index: 20,
                    limit_mph: 55.0,
                },
            ],
        };

        assert_eq!(section.speed_limit_at(12), Some(65.0));
        assert_eq!(section.speed_limit_at(15), None);
        assert_eq!(section.speed_limit_at(20), Some(55.0));
        assert_eq!(section.speed_limit_at(21), None);
        assert_eq!(section.sensor_count(), 11);
    }

    #[test]
    fn test_detail_overlay_keeps_missing_fields() {
        let mut detail = IncidentDetail {
            road_section_id: Some(4),
            description: Some("Crash".to_string()),
            severity: Some(2),
            ..Default::default()
        };
        let newer = IncidentDetail {
            description: Some("Crash, 2 lanes blocked".to_string()),
            ..Default::default()
        };

        detail.overlay(&newer);

        assert_eq!(detail.road_section_id, Some(4));
        assert_eq!(detail.severity, Some(2));
        assert_eq!(detail.description.as_deref(), Some("Crash, 2 lanes blocked"));
    }

    #[test]
    fn test_detail_fill_gaps_never_overwrites() {
        let mut detail = IncidentDetail {
            description: Some("Cleared".to_string()),
            ..Default::default()
        };
        let older = IncidentDetail {
            description: Some("Crash".to_string()),
            location: Some("I-405 S at Culver Blvd".to_string()),
            ..Default::default()
        };

        detail.fill_gaps(&older);

        assert_eq!(detail.description.as_deref(), Some("Cleared"));
        assert_eq!(detail.location.as_deref(), Some("I-405 S at Culver Blvd"));
    }
}
