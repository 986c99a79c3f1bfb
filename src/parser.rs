//! JSON parsers for the static, live and archived traffic payloads.

use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;

use crate::error::SchemaError;
use crate::payload::{ArchivedPayload, LivePayload, StaticPayload};

/// A per-poll payload in either of its two shapes.
#[derive(Debug)]
pub enum Payload {
    Live(LivePayload),
    Archived(ArchivedPayload),
}

/// Decodes the static metadata payload.
///
/// # Errors
///
/// Returns [`SchemaError::Malformed`] naming the missing or mistyped key.
pub fn parse_static(bytes: &[u8]) -> Result<StaticPayload, SchemaError> {
    serde_json::from_slice(&maybe_gunzip(bytes)?).map_err(|e| SchemaError::Malformed {
        payload: "static",
        detail: e.to_string(),
    })
}

/// Decodes a live or archived payload, telling them apart by their keys:
/// `speeds` marks a live payload, `t` together with `s` an archived one.
/// Gzip-compressed input is accepted.
pub fn parse_payload(bytes: &[u8]) -> Result<Payload, SchemaError> {
    let value: Value =
        serde_json::from_slice(&maybe_gunzip(bytes)?).map_err(|e| SchemaError::Malformed {
            payload: "traffic",
            detail: e.to_string(),
        })?;

    let Some(object) = value.as_object() else {
        return Err(SchemaError::UnrecognisedShape);
    };

    if object.contains_key("speeds") {
        serde_json::from_value(value)
            .map(Payload::Live)
            .map_err(|e| SchemaError::Malformed {
                payload: "live",
                detail: e.to_string(),
            })
    } else if object.contains_key("t") && object.contains_key("s") {
        serde_json::from_value(value)
            .map(Payload::Archived)
            .map_err(|e| SchemaError::Malformed {
                payload: "archived",
                detail: e.to_string(),
            })
    } else {
        Err(SchemaError::UnrecognisedShape)
    }
}

fn maybe_gunzip(bytes: &[u8]) -> Result<Vec<u8>, SchemaError> {
    if !bytes.starts_with(&[0x1f, 0x8b]) {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| SchemaError::Malformed {
            payload: "gzip",
            detail: e.to_string(),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn test_parse_live_shape() {
        let bytes = br#"{"speeds": [[55, null, []]], "incidents": [], "cameras": [[1, 2]]}"#;
        let payload = parse_payload(bytes).unwrap();

        let Payload::Live(live) = payload else {
            panic!("expected live payload");
        };
        assert_eq!(live.speeds.len(), 1);
        assert_eq!(live.speeds[0].0.speed_mph, Some(55.0));
    }

    #[test]
    fn test_parse_archived_shape() {
        let bytes = br#"{"t": "2026-01-13T15:40:00Z", "s": [[55, []], [null, []]], "i": []}"#;
        let payload = parse_payload(bytes).unwrap();

        let Payload::Archived(archived) = payload else {
            panic!("expected archived payload");
        };
        assert_eq!(archived.speeds.len(), 2);
        assert_eq!(archived.captured_at.to_rfc3339(), "2026-01-13T15:40:00+00:00");
    }

    #[test]
    fn test_parse_gzipped_payload() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"t": "2026-01-13T15:40:00Z", "s": [[55, []]]}"#)
            .unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(matches!(
            parse_payload(&compressed).unwrap(),
            Payload::Archived(_)
        ));
    }

    #[test]
    fn test_unknown_shape() {
        assert_eq!(
            parse_payload(br#"{"foo": 1}"#).unwrap_err(),
            SchemaError::UnrecognisedShape
        );
        assert_eq!(
            parse_payload(b"[1, 2]").unwrap_err(),
            SchemaError::UnrecognisedShape
        );
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_payload(&[0xFF, 0xFE, 0x00]).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }));
    }

    #[test]
    fn test_static_missing_key_names_field() {
        let err = parse_static(br#"{"sensorNames": [], "sensorPositions": [], "roadSections": []}"#)
            .unwrap_err();

        let SchemaError::Malformed { detail, .. } = err else {
            panic!("expected malformed");
        };
        assert!(detail.contains("roads"));
    }
}
