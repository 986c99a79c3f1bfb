//! Commute routes and their resolution against the topology.
//!
//! A [`Route`] is caller input: an ordered list of segments, each either an
//! explicit sensor range on one highway and direction or a whole road
//! section. [`resolve_route`] turns it into the sensor sets, lengths and
//! free-flow speeds the aggregator works on.

use anyhow::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::model::Direction;
use crate::topology::Topology;

/// Part of a commute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteSegment {
    /// Sensors `start_index..=end_index` that lie on `route` heading `direction`.
    Range {
        route: String,
        direction: Direction,
        start_index: u32,
        end_index: u32,
    },
    /// Every sensor of a road section.
    Section { section_id: u32 },
}

impl RouteSegment {
    pub fn range(route: &str, direction: Direction, start_index: u32, end_index: u32) -> Self {
        RouteSegment::Range {
            route: route.to_string(),
            direction,
            start_index,
            end_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CommutePeriod {
    Morning,
    Evening,
}

impl CommutePeriod {
    /// Local departure times worth reporting for the period, end exclusive.
    pub fn time_range(&self) -> (NaiveTime, NaiveTime) {
        let (start, end) = match self {
            CommutePeriod::Morning => (5, 11),
            CommutePeriod::Evening => (15, 21),
        };
        (
            NaiveTime::from_hms_opt(start, 0, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(end, 0, 0).unwrap_or(NaiveTime::MIN),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(default)]
    pub period: Option<CommutePeriod>,
    pub segments: Vec<RouteSegment>,
}

/// A set of named routes.
///
/// Stored on disk as JSON:
/// ```json
/// {
///   "routes": [
///     {
///       "name": "405 to 710",
///       "period": "morning",
///       "segments": [
///         {"route": "405", "direction": "South", "start_index": 5789, "end_index": 5816},
///         {"section_id": 412}
///       ]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteBook {
    pub routes: Vec<Route>,
}

impl RouteBook {
    /// Loads a route book from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let book: RouteBook = serde_json::from_str(&content)?;
        Ok(book)
    }

    /// Culver City to Port of Long Beach and back.
    pub fn socal_commute() -> Self {
        use CommutePeriod::{Evening, Morning};
        use Direction::{East, North, South, West};

        let route = |name: &str, period, segments: Vec<RouteSegment>| Route {
            name: name.to_string(),
            period: Some(period),
            segments,
        };

        RouteBook {
            routes: vec![
                route(
                    "405 S to 710 S",
                    Morning,
                    vec![
                        RouteSegment::range("405", South, 5789, 5816),
                        RouteSegment::range("710", West, 5949, 5956),
                    ],
                ),
                route(
                    "405 S to 105 E to 710 S",
                    Morning,
                    vec![
                        RouteSegment::range("405", South, 5789, 5800),
                        RouteSegment::range("105", East, 4754, 4768),
                        RouteSegment::range("710", West, 5949, 5956),
                    ],
                ),
                route(
                    "10 E to 110 S to 710 S",
                    Morning,
                    vec![
                        RouteSegment::range("10", East, 1537, 1551),
                        RouteSegment::range("110", South, 4825, 4873),
                        RouteSegment::range("710", West, 5949, 5956),
                    ],
                ),
                route(
                    "710 N to 405 N",
                    Evening,
                    vec![
                        RouteSegment::range("710", East, 5924, 5930),
                        RouteSegment::range("405", North, 5709, 5736),
                    ],
                ),
                route(
                    "710 N to 105 W to 405 N",
                    Evening,
                    vec![
                        RouteSegment::range("710", East, 5924, 5930),
                        RouteSegment::range("105", West, 4781, 4795),
                        RouteSegment::range("405", North, 5730, 5736),
                    ],
                ),
                route(
                    "710 N to 110 N to 10 W",
                    Evening,
                    vec![
                        RouteSegment::range("710", East, 5924, 5930),
                        RouteSegment::range("110", North, 4776, 4824),
                        RouteSegment::range("10", West, 1981, 1993),
                    ],
                ),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Result<&Route, RouteError> {
        self.routes
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RouteError::NotFound(name.to_string()))
    }

    pub fn for_period(&self, period: CommutePeriod) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(move |r| r.period == Some(period))
    }
}

/// A route segment mapped onto concrete sensors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSegment {
    pub label: String,
    /// Sensor indices in travel order.
    pub sensors: Vec<u32>,
    /// Mean known speed limit of the segment's sensors.
    pub free_flow_mph: Option<f64>,
}

impl ResolvedSegment {
    pub fn length_miles(&self, miles_per_sensor: f64) -> f64 {
        self.sensors.len() as f64 * miles_per_sensor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRoute {
    pub name: String,
    pub segments: Vec<ResolvedSegment>,
}

impl ResolvedRoute {
    /// Every sensor of the route, segment by segment.
    pub fn sensors(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.sensors.iter().map(move |&sensor| (i, sensor)))
    }
}

/// Checks every segment against the topology and collects its sensors.
pub fn resolve_route(route: &Route, topology: &Topology) -> Result<ResolvedRoute, RouteError> {
    if route.segments.is_empty() {
        return Err(RouteError::Empty {
            route: route.name.clone(),
        });
    }

    let mut segments = Vec::with_capacity(route.segments.len());
    for (i, segment) in route.segments.iter().enumerate() {
        let (highway, direction, start, end) = match segment {
            RouteSegment::Range {
                route: highway,
                direction,
                start_index,
                end_index,
            } => (highway.clone(), *direction, *start_index, *end_index),
            RouteSegment::Section { section_id } => {
                let section = topology.section(*section_id).ok_or_else(|| {
                    RouteError::UnknownSection {
                        route: route.name.clone(),
                        segment: i,
                        section_id: *section_id,
                    }
                })?;
                (
                    section.route.clone(),
                    section.direction,
                    section.start_index,
                    section.end_index,
                )
            }
        };

        if start > end {
            return Err(RouteError::Inverted {
                route: route.name.clone(),
                segment: i,
                start,
                end,
            });
        }
        if end as usize >= topology.sensor_count() {
            return Err(RouteError::OutOfRange {
                route: route.name.clone(),
                segment: i,
                start,
                end,
                len: topology.sensor_count(),
            });
        }

        let sensors: Vec<u32> = topology
            .sensors_on(&highway, direction)
            .map(|s| s.index)
            .filter(|index| (start..=end).contains(index))
            .collect();
        if sensors.is_empty() {
            return Err(RouteError::NoSensors {
                route: route.name.clone(),
                segment: i,
                highway,
                direction: direction.to_string(),
            });
        }

        let limits: Vec<f64> = sensors
            .iter()
            .filter_map(|&index| topology.speed_limit(index))
            .collect();
        let free_flow_mph = (!limits.is_empty())
            .then(|| limits.iter().sum::<f64>() / limits.len() as f64);

        segments.push(ResolvedSegment {
            label: format!("{highway} {direction} {start}-{end}"),
            sensors,
            free_flow_mph,
        });
    }

    Ok(ResolvedRoute {
        name: route.name.clone(),
        segments,
    })
}
