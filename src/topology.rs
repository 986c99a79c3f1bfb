//! Static road topology: sensors, road sections and speed limits.
//!
//! Built once from the static payload and never mutated afterwards; share
//! it behind an `Arc` between ingest and analysis. Sensor index is the join
//! key for every later layer, so a payload that would lose or shift a sensor
//! is rejected outright rather than repaired.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::SchemaError;
use crate::model::{Direction, RoadSection, Sensor, SensorPosition, SpeedLimitRange};
use crate::parser::parse_static;
use crate::payload::{RawRoadSection, StaticPayload};

#[derive(Debug, Clone)]
pub struct Topology {
    sensors: Vec<Sensor>,
    sections: BTreeMap<u32, RoadSection>,
}

/// Sensor count of one highway in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub route: String,
    pub direction: Direction,
    pub sensor_count: usize,
}

impl Topology {
    /// Parses and validates a static payload.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SchemaError> {
        Self::from_payload(parse_static(bytes)?)
    }

    pub fn from_payload(payload: StaticPayload) -> Result<Self, SchemaError> {
        let len = payload.sensor_names.len();

        if payload.sensor_positions.len() != len {
            return Err(SchemaError::LengthMismatch {
                field: "sensorPositions",
                expected: len,
                actual: payload.sensor_positions.len(),
            });
        }

        let positions = payload
            .sensor_positions
            .iter()
            .enumerate()
            .map(|(i, values)| {
                <[f64; 4]>::try_from(values.as_slice())
                    .map(SensorPosition)
                    .map_err(|_| SchemaError::Malformed {
                        payload: "static",
                        detail: format!(
                            "sensorPositions[{i}] has {} numbers, expected 4",
                            values.len()
                        ),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut sections = BTreeMap::new();
        let mut owner: Vec<Option<u32>> = vec![None; len];

        for (pos, RawRoadSection(id, direction, route, start, end)) in
            payload.road_sections.into_iter().enumerate()
        {
            let field = format!("roadSections[{pos}]");
            let direction =
                Direction::parse(&direction).ok_or_else(|| SchemaError::UnknownDirection {
                    field: field.clone(),
                    value: direction.clone(),
                })?;
            let start_index = check_index(&field, start, len)?;
            let end_index = check_index(&field, end, len)?;
            if start_index > end_index {
                return Err(SchemaError::InvertedRange { field, start, end });
            }
            if sections.contains_key(&id) {
                return Err(SchemaError::DuplicateSection {
                    field: "roadSections",
                    id,
                });
            }

            for index in start_index..=end_index {
                let slot = &mut owner[index as usize];
                if slot.is_some() {
                    return Err(SchemaError::OverlappingRanges {
                        field: field.clone(),
                        index,
                    });
                }
                *slot = Some(id);
            }

            sections.insert(
                id,
                RoadSection {
                    id,
                    direction,
                    route: route.into_string(),
                    start_index,
                    end_index,
                    speed_limits: Vec::new(),
                },
            );
        }

        for (key, road) in &payload.roads {
            let unknown = || SchemaError::UnknownSection {
                field: "roads",
                id: key.clone(),
            };
            let id: u32 = key.trim().parse().map_err(|_| unknown())?;
            let section = sections.get_mut(&id).ok_or_else(unknown)?;
            section.speed_limits = speed_limit_ranges(section, road, len)?;
        }

        let sensors = payload
            .sensor_names
            .into_iter()
            .zip(positions)
            .enumerate()
            .map(|(i, (name, position))| {
                let index = i as u32;
                let section = owner[i].and_then(|id| sections.get(&id));
                Sensor {
                    index,
                    name,
                    position,
                    road_section_id: owner[i],
                    direction: section.map(|s| s.direction),
                    route: section.map(|s| s.route.clone()),
                    speed_limit_mph: section.and_then(|s| s.speed_limit_at(index)),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            sensors = sensors.len(),
            sections = sections.len(),
            "Topology loaded"
        );

        Ok(Topology { sensors, sections })
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor(&self, index: u32) -> Option<&Sensor> {
        self.sensors.get(index as usize)
    }

    pub fn section(&self, id: u32) -> Option<&RoadSection> {
        self.sections.get(&id)
    }

    pub fn sections(&self) -> impl Iterator<Item = &RoadSection> {
        self.sections.values()
    }

    /// Free-flow limit at `index`, `None` when the sensor is outside every
    /// limit sub-range.
    pub fn speed_limit(&self, index: u32) -> Option<f64> {
        self.sensor(index).and_then(|s| s.speed_limit_mph)
    }

    pub fn sensors_on<'a>(
        &'a self,
        route: &'a str,
        direction: Direction,
    ) -> impl Iterator<Item = &'a Sensor> + 'a {
        self.sensors.iter().filter(move |s| {
            s.route.as_deref() == Some(route) && s.direction == Some(direction)
        })
    }

    /// Sensor counts per highway and direction, ordered by highway.
    pub fn route_summaries(&self) -> Vec<RouteSummary> {
        let mut counts: BTreeMap<(&str, Direction), usize> = BTreeMap::new();
        for sensor in &self.sensors {
            if let (Some(route), Some(direction)) = (sensor.route.as_deref(), sensor.direction) {
                *counts.entry((route, direction)).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .map(|((route, direction), sensor_count)| RouteSummary {
                route: route.to_string(),
                direction,
                sensor_count,
            })
            .collect()
    }
}

fn check_index(field: &str, index: i64, len: usize) -> Result<u32, SchemaError> {
    if index < 0 || index as usize >= len {
        return Err(SchemaError::IndexOutOfRange {
            field: field.to_string(),
            index,
            len,
        });
    }
    Ok(index as u32)
}

/// Decodes `[route, _, _, [[start, end, limit]...]]` for one section.
/// Sub-ranges must stay inside the section and must not overlap each other.
fn speed_limit_ranges(
    section: &RoadSection,
    road: &[Value],
    len: usize,
) -> Result<Vec<SpeedLimitRange>, SchemaError> {
    let field = format!("roads[{}]", section.id);

    let raw: Vec<(i64, i64, f64)> = match road.get(3) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| SchemaError::Malformed {
                payload: "static",
                detail: format!("{field}: {e}"),
            })?
        }
    };

    let mut ranges = Vec::with_capacity(raw.len());
    for (start, end, limit_mph) in raw {
        let start_index = check_index(&field, start, len)?;
        let end_index = check_index(&field, end, len)?;
        if start_index > end_index {
            return Err(SchemaError::InvertedRange {
                field: field.clone(),
                start,
                end,
            });
        }
        if !section.contains(start_index) || !section.contains(end_index) {
            return Err(SchemaError::OutsideSection {
                field: field.clone(),
                start: start_index,
                end: end_index,
                section_id: section.id,
            });
        }
        if !(limit_mph.is_finite() && limit_mph > 0.0) {
            return Err(SchemaError::InvalidSpeedLimit {
                field: field.clone(),
                limit: limit_mph,
            });
        }
        ranges.push(SpeedLimitRange {
            start_index,
            end_index,
            limit_mph,
        });
    }

    ranges.sort_by_key(|r| r.start_index);
    for pair in ranges.windows(2) {
        if pair[1].start_index <= pair[0].end_index {
            return Err(SchemaError::OverlappingRanges {
                field,
                index: pair[1].start_index,
            });
        }
    }

    Ok(ranges)
}
