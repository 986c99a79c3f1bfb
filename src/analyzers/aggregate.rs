use crate::analyzers::grade::grade;
use crate::analyzers::types::{
    BucketOutcome, BucketReport, BucketStats, CommuteQuery, CommuteReport, InsufficientData,
    Recommendation, TimeBucket,
};
use crate::analyzers::utility::{median, weighted_mean, weighted_variance};
use crate::error::QueryError;
use crate::model::Reading;
use crate::routes::ResolvedRoute;
use crate::store::ReadingHistory;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Bumped whenever the report JSON changes shape.
pub const REPORT_SCHEMA_VERSION: u8 = 1;

/// Weighted running sum of speeds.
#[derive(Debug, Default, Clone, Copy)]
struct SpeedSum {
    sum: f64,
    weight: f64,
}

impl SpeedSum {
    fn add(&mut self, speed: f64, weight: f64) {
        self.sum += speed * weight;
        self.weight += weight;
    }

    fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

/// Samples of one capture time, split by route segment.
#[derive(Debug)]
struct Poll {
    weight: f64,
    segments: Vec<SpeedSum>,
}

#[derive(Debug)]
struct BucketAccumulator {
    speeds: Vec<(f64, f64)>,
    reading_count: usize,
    incident_adjusted: bool,
    segments: Vec<SpeedSum>,
    sensors: BTreeMap<u32, SpeedSum>,
    polls: BTreeMap<DateTime<Utc>, Poll>,
}

impl BucketAccumulator {
    fn new(segment_count: usize) -> Self {
        BucketAccumulator {
            speeds: Vec::new(),
            reading_count: 0,
            incident_adjusted: false,
            segments: vec![SpeedSum::default(); segment_count],
            sensors: BTreeMap::new(),
            polls: BTreeMap::new(),
        }
    }

    fn add(&mut self, segment: usize, reading: &Reading, weight: f64) {
        self.reading_count += 1;
        self.incident_adjusted |= reading.has_active_incident();

        let Some(speed) = reading.speed_mph else {
            return;
        };

        let segment_count = self.segments.len();
        self.speeds.push((speed, weight));
        self.segments[segment].add(speed, weight);
        self.sensors
            .entry(reading.sensor_index)
            .or_default()
            .add(speed, weight);
        self.polls
            .entry(reading.timestamp)
            .or_insert_with(|| Poll {
                weight,
                segments: vec![SpeedSum::default(); segment_count],
            })
            .segments[segment]
            .add(speed, 1.0);
    }

    fn finish(&self, route: &ResolvedRoute, miles_per_sensor: f64) -> BucketOutcome {
        let not_enough = |reason| BucketOutcome::NotEnoughData {
            reason,
            reading_count: self.reading_count,
        };

        if self.speeds.is_empty() {
            return not_enough(InsufficientData::NoSamples);
        }
        let negligible = || {
            not_enough(InsufficientData::NegligibleWeight {
                sample_count: self.speeds.len(),
            })
        };
        let Some(mean_speed_mph) = weighted_mean(&self.speeds) else {
            return negligible();
        };

        // Speed a segment falls back to in a poll where it has no sample.
        let mut fallback = Vec::with_capacity(route.segments.len());
        for (i, segment) in route.segments.iter().enumerate() {
            match self.segments[i].mean().or(segment.free_flow_mph) {
                Some(speed) => fallback.push(speed),
                None => return not_enough(InsufficientData::SegmentUncovered { segment: i }),
            }
        }

        let durations: Vec<(f64, f64)> = self
            .polls
            .values()
            .map(|poll| {
                let minutes = route
                    .segments
                    .iter()
                    .enumerate()
                    .map(|(i, segment)| {
                        let speed = poll.segments[i].mean().unwrap_or(fallback[i]);
                        segment.length_miles(miles_per_sensor) * 60.0 / speed
                    })
                    .sum::<f64>();
                (minutes, poll.weight)
            })
            .collect();

        let Some(implied_duration_minutes) = weighted_mean(&durations) else {
            return negligible();
        };
        let duration_variance = weighted_variance(&durations, implied_duration_minutes);

        let Some(slowest_sensor_mph) = self
            .sensors
            .values()
            .filter_map(SpeedSum::mean)
            .reduce(f64::min)
        else {
            return negligible();
        };

        let values: Vec<f64> = self.speeds.iter().map(|(v, _)| *v).collect();

        BucketOutcome::Stats(BucketStats {
            mean_speed_mph,
            median_speed_mph: median(&values),
            implied_duration_minutes,
            duration_variance,
            incident_adjusted: self.incident_adjusted,
            sample_count: self.speeds.len(),
            reading_count: self.reading_count,
            poll_count: self.polls.len(),
            slowest_sensor_mph,
            congestion: grade(slowest_sensor_mph),
        })
    }
}

/// Aggregates a route's reading history into per-bucket commute statistics.
///
/// Every bucket the query selects appears in the report, either with stats
/// or as `NotEnoughData`. Recommendations rank the buckets with stats by
/// implied duration, then by its variance.
pub fn aggregate_commute<H: ReadingHistory + ?Sized>(
    route: &ResolvedRoute,
    query: &CommuteQuery,
    history: &H,
) -> Result<CommuteReport, QueryError> {
    query.validate()?;

    let mut accumulators: BTreeMap<u32, BucketAccumulator> = BTreeMap::new();

    for (segment, sensor) in route.sensors() {
        for reading in history.sensor_readings(sensor, query.from, query.to) {
            let Some(bucket) = query.bucket_of(reading.timestamp) else {
                continue;
            };
            let weight = query.weighting.weight(reading.timestamp, query.to);
            accumulators
                .entry(bucket)
                .or_insert_with(|| BucketAccumulator::new(route.segments.len()))
                .add(segment, reading, weight);
        }
    }

    let buckets: Vec<BucketReport> = (0..query.buckets_per_day())
        .filter(|&index| query.includes_bucket(index))
        .map(|index| BucketReport {
            bucket: TimeBucket::new(index, query.bucket_minutes),
            outcome: match accumulators.get(&index) {
                Some(acc) => acc.finish(route, query.miles_per_sensor),
                None => BucketOutcome::NotEnoughData {
                    reason: InsufficientData::NoSamples,
                    reading_count: 0,
                },
            },
        })
        .collect();

    let recommendations = rank(&buckets);

    Ok(CommuteReport {
        schema_version: REPORT_SCHEMA_VERSION,
        route: route.name.clone(),
        window_from: query.from,
        window_to: query.to,
        bucket_minutes: query.bucket_minutes,
        utc_offset_minutes: query.utc_offset.local_minus_utc() / 60,
        buckets,
        recommendations,
    })
}

fn rank(buckets: &[BucketReport]) -> Vec<Recommendation> {
    let mut candidates: Vec<(&TimeBucket, &BucketStats)> = buckets
        .iter()
        .filter_map(|b| b.outcome.stats().map(|stats| (&b.bucket, stats)))
        .collect();

    candidates.sort_by(|(a_bucket, a), (b_bucket, b)| {
        a.implied_duration_minutes
            .total_cmp(&b.implied_duration_minutes)
            .then_with(|| a.duration_variance.total_cmp(&b.duration_variance))
            .then_with(|| a_bucket.index.cmp(&b_bucket.index))
    });

    candidates
        .into_iter()
        .enumerate()
        .map(|(i, (bucket, stats))| Recommendation {
            rank: i + 1,
            bucket: *bucket,
            implied_duration_minutes: stats.implied_duration_minutes,
            duration_variance: stats.duration_variance,
            mean_speed_mph: stats.mean_speed_mph,
            incident_adjusted: stats.incident_adjusted,
        })
        .collect()
}
