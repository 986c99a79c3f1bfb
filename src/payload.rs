//! Wire shapes of the Sigalert payloads.
//!
//! The upstream API encodes records as positional JSON arrays
//! (`[speed, null, [[type, id]], cameraId?]` and friends). They are decoded
//! here into named records and nothing downstream indexes a tuple.
//!
//! Speed entries and incident rows decode leniently: a broken entry becomes a
//! defect carried next to the data instead of failing the whole payload. The
//! array-length contract is checked later, by the normalizer.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{IncidentDetail, IncidentKind, IncidentRef};

/// One-time metadata payload (`SoCalStatic.json`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticPayload {
    pub sensor_names: Vec<String>,
    pub sensor_positions: Vec<Vec<f64>>,
    pub road_sections: Vec<RawRoadSection>,
    /// Section id (as a JSON object key) to `[route, _, _, [[start, end, limit]]]`.
    pub roads: HashMap<String, Vec<Value>>,
}

/// `[id, direction, route, startIdx, endIdx]`
#[derive(Debug, Deserialize)]
pub struct RawRoadSection(
    pub u32,
    pub String,
    pub TextOrNumber,
    pub i64,
    pub i64,
);

/// Route designators arrive as `"405"` or `405` depending on the payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl TextOrNumber {
    pub fn into_string(self) -> String {
        match self {
            TextOrNumber::Text(text) => text,
            TextOrNumber::Number(number) => number.to_string(),
        }
    }
}

/// Per-poll live payload (`SoCalData.json`).
#[derive(Debug, Deserialize)]
pub struct LivePayload {
    pub speeds: Vec<LiveSpeedEntry>,
    #[serde(default)]
    pub incidents: Vec<LiveIncidentRow>,
    #[serde(default)]
    pub cameras: IgnoredAny,
}

/// Reduced archive payload: `{t, s: [[speed, refs]], i: [[id, location, description, startIso]]}`.
#[derive(Debug, Deserialize)]
pub struct ArchivedPayload {
    #[serde(rename = "t")]
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "s")]
    pub speeds: Vec<CompactSpeedEntry>,
    #[serde(rename = "i", default)]
    pub incidents: Vec<CompactIncidentRow>,
}

/// A decoded speed entry. `defect` is set when any part of the source entry
/// could not be read; whatever could be read is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedEntry {
    pub speed_mph: Option<f64>,
    pub incident_refs: Vec<IncidentRef>,
    pub defect: Option<String>,
}

impl SpeedEntry {
    fn defective(detail: String) -> Self {
        SpeedEntry {
            defect: Some(detail),
            ..Default::default()
        }
    }

    /// Decodes `[speed, ...]` with the incident-reference list at `refs_at`.
    fn decode(value: &Value, refs_at: usize) -> Self {
        let Some(items) = value.as_array() else {
            return SpeedEntry::defective(format!("entry is not an array: {value}"));
        };
        if items.is_empty() {
            return SpeedEntry::defective("entry is empty".to_string());
        }

        let mut defects = Vec::new();

        let speed_mph = match decode_speed(&items[0]) {
            Ok(speed) => speed,
            Err(detail) => {
                defects.push(detail);
                None
            }
        };

        let mut incident_refs = Vec::new();
        match items.get(refs_at) {
            None | Some(Value::Null) => {}
            Some(Value::Array(refs)) => {
                for r in refs {
                    match decode_ref(r) {
                        Some(incident_ref) => incident_refs.push(incident_ref),
                        None => defects.push(format!("bad incident reference {r}")),
                    }
                }
            }
            Some(other) => defects.push(format!("incident references are not a list: {other}")),
        }

        SpeedEntry {
            speed_mph,
            incident_refs,
            defect: if defects.is_empty() {
                None
            } else {
                Some(defects.join("; "))
            },
        }
    }
}

/// `[speed|null, null, [[type, id]...], cameraId?]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct LiveSpeedEntry(pub SpeedEntry);

impl From<Value> for LiveSpeedEntry {
    fn from(value: Value) -> Self {
        LiveSpeedEntry(SpeedEntry::decode(&value, 2))
    }
}

/// `[speed|null, [[type, id]...]]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct CompactSpeedEntry(pub SpeedEntry);

impl From<Value> for CompactSpeedEntry {
    fn from(value: Value) -> Self {
        CompactSpeedEntry(SpeedEntry::decode(&value, 1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    pub incident_id: u64,
    pub detail: IncidentDetail,
}

/// A decoded incident row, or why it could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentEntry {
    Record(IncidentRecord),
    Malformed(String),
}

/// `[sectionId, incidentId, timeText, location, description, severity?, x, y, startIso, updateIso]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct LiveIncidentRow(pub IncidentEntry);

impl From<Value> for LiveIncidentRow {
    fn from(value: Value) -> Self {
        let entry = match value.as_array() {
            Some(items) if items.len() >= 10 => match as_id(&items[1]) {
                Some(incident_id) => IncidentEntry::Record(IncidentRecord {
                    incident_id,
                    detail: IncidentDetail {
                        road_section_id: as_id(&items[0]).and_then(|id| u32::try_from(id).ok()),
                        reported_time_text: as_text(&items[2]),
                        location: as_text(&items[3]),
                        description: as_text(&items[4]),
                        severity: items[5].as_i64(),
                        x: items[6].as_f64(),
                        y: items[7].as_f64(),
                        start_time_iso: as_text(&items[8]),
                        update_time_iso: as_text(&items[9]),
                    },
                }),
                None => IncidentEntry::Malformed(format!("bad incident id {}", items[1])),
            },
            Some(items) => {
                IncidentEntry::Malformed(format!("expected 10 fields, found {}", items.len()))
            }
            None => IncidentEntry::Malformed(format!("row is not an array: {value}")),
        };
        LiveIncidentRow(entry)
    }
}

/// `[incidentId, location, description, startIso]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct CompactIncidentRow(pub IncidentEntry);

impl From<Value> for CompactIncidentRow {
    fn from(value: Value) -> Self {
        let entry = match value.as_array() {
            Some(items) if items.len() >= 4 => match as_id(&items[0]) {
                Some(incident_id) => IncidentEntry::Record(IncidentRecord {
                    incident_id,
                    detail: IncidentDetail {
                        location: as_text(&items[1]),
                        description: as_text(&items[2]),
                        start_time_iso: as_text(&items[3]),
                        ..Default::default()
                    },
                }),
                None => IncidentEntry::Malformed(format!("bad incident id {}", items[0])),
            },
            Some(items) => {
                IncidentEntry::Malformed(format!("expected 4 fields, found {}", items.len()))
            }
            None => IncidentEntry::Malformed(format!("row is not an array: {value}")),
        };
        CompactIncidentRow(entry)
    }
}

/// Zero is the source's "no data" marker, as is `null`.
fn decode_speed(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => match number.as_f64() {
            Some(speed) if speed.is_finite() && speed > 0.0 => Ok(Some(speed)),
            Some(speed) if speed == 0.0 => Ok(None),
            _ => Err(format!("speed {number} is out of range")),
        },
        other => Err(format!("speed is not a number: {other}")),
    }
}

fn decode_ref(value: &Value) -> Option<IncidentRef> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    Some(IncidentRef {
        kind: IncidentKind::from(pair[0].as_i64()?),
        incident_id: as_id(&pair[1])?,
    })
}

/// Ids arrive as integers, integral floats or numeric strings.
fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_speed_entry_full() {
        let entry: LiveSpeedEntry =
            serde_json::from_value(json!([58, null, [[1, 47601929], [2, 5]], 812])).unwrap();

        assert_eq!(entry.0.speed_mph, Some(58.0));
        assert_eq!(entry.0.incident_refs.len(), 2);
        assert!(entry.0.incident_refs[0].is_active());
        assert_eq!(entry.0.incident_refs[0].incident_id, 47601929);
        assert_eq!(entry.0.incident_refs[1].kind, IncidentKind::Other(2));
        assert!(entry.0.defect.is_none());
    }

    #[test]
    fn test_live_speed_entry_null_speed_is_not_a_defect() {
        let entry: LiveSpeedEntry = serde_json::from_value(json!([null, null, []])).unwrap();

        assert_eq!(entry.0.speed_mph, None);
        assert!(entry.0.defect.is_none());
    }

    #[test]
    fn test_zero_speed_means_no_data() {
        let entry: LiveSpeedEntry = serde_json::from_value(json!([0, null, []])).unwrap();

        assert_eq!(entry.0.speed_mph, None);
        assert!(entry.0.defect.is_none());
    }

    #[test]
    fn test_corrupt_entries_become_defects() {
        let not_array: LiveSpeedEntry = serde_json::from_value(json!("fast")).unwrap();
        assert_eq!(not_array.0.speed_mph, None);
        assert!(not_array.0.defect.is_some());

        let bad_speed: LiveSpeedEntry =
            serde_json::from_value(json!(["65", null, [[1, 9]]])).unwrap();
        assert_eq!(bad_speed.0.speed_mph, None);
        assert_eq!(bad_speed.0.incident_refs.len(), 1);
        assert!(bad_speed.0.defect.is_some());

        let negative: LiveSpeedEntry = serde_json::from_value(json!([-3, null, []])).unwrap();
        assert_eq!(negative.0.speed_mph, None);
        assert!(negative.0.defect.is_some());
    }

    #[test]
    fn test_bad_reference_keeps_speed_and_good_refs() {
        let entry: LiveSpeedEntry =
            serde_json::from_value(json!([40, null, [[1, 77], ["x"], [1, "78"]]])).unwrap();

        assert_eq!(entry.0.speed_mph, Some(40.0));
        let ids: Vec<u64> = entry.0.incident_refs.iter().map(|r| r.incident_id).collect();
        assert_eq!(ids, vec![77, 78]);
        assert!(entry.0.defect.is_some());
    }

    #[test]
    fn test_compact_speed_entry() {
        let entry: CompactSpeedEntry = serde_json::from_value(json!([61, [[1, 12]]])).unwrap();

        assert_eq!(entry.0.speed_mph, Some(61.0));
        assert_eq!(entry.0.incident_refs[0].incident_id, 12);
    }

    #[test]
    fn test_live_incident_row() {
        let row: LiveIncidentRow = serde_json::from_value(json!([
            412,
            47601929,
            "7:42 AM",
            "I-405 S at Culver Blvd",
            "Crash, right lane blocked",
            null,
            1200,
            3400,
            "2026-01-13T15:40:00Z",
            "2026-01-13T15:52:00Z"
        ]))
        .unwrap();

        let IncidentEntry::Record(record) = row.0 else {
            panic!("expected a record");
        };
        assert_eq!(record.incident_id, 47601929);
        assert_eq!(record.detail.road_section_id, Some(412));
        assert_eq!(record.detail.severity, None);
        assert_eq!(record.detail.x, Some(1200.0));
        assert_eq!(
            record.detail.update_time_iso.as_deref(),
            Some("2026-01-13T15:52:00Z")
        );
    }

    #[test]
    fn test_short_incident_row_is_malformed() {
        let row: LiveIncidentRow = serde_json::from_value(json!([412, 5, "7:42 AM"])).unwrap();
        assert!(matches!(row.0, IncidentEntry::Malformed(_)));
    }

    #[test]
    fn test_compact_incident_row() {
        let row: CompactIncidentRow = serde_json::from_value(json!([
            "47601929",
            "I-405 S at Culver Blvd",
            "Crash",
            "2026-01-13T15:40:00Z"
        ]))
        .unwrap();

        let IncidentEntry::Record(record) = row.0 else {
            panic!("expected a record");
        };
        assert_eq!(record.incident_id, 47601929);
        assert_eq!(record.detail.location.as_deref(), Some("I-405 S at Culver Blvd"));
        assert_eq!(record.detail.road_section_id, None);
    }
}
