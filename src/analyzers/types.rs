//! Query and report types of the commute aggregation.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, Timelike, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::analyzers::grade::CongestionLevel;
use crate::error::QueryError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Rough spacing between consecutive sensors; the source publishes no
/// distances.
pub const DEFAULT_MILES_PER_SENSOR: f64 = 0.5;

/// How much a sample counts towards a bucket's averages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SampleWeighting {
    /// Every day in the window counts the same.
    #[default]
    Uniform,
    /// Weight halves every `half_life_days` back from the window end.
    RecencyHalfLife { half_life_days: f64 },
}

impl SampleWeighting {
    pub fn weight(&self, at: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
        match self {
            SampleWeighting::Uniform => 1.0,
            SampleWeighting::RecencyHalfLife { half_life_days } => {
                let age_days = (reference - at).num_seconds().max(0) as f64 / 86_400.0;
                0.5_f64.powf(age_days / half_life_days)
            }
        }
    }
}

/// One commute aggregation request over `[from, to)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommuteQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket_minutes: u32,
    /// Offset used to turn capture times into local time of day.
    pub utc_offset: FixedOffset,
    /// Only readings on these local weekdays count; `None` keeps every day.
    pub weekdays: Option<Vec<Weekday>>,
    /// Local `[start, end)` range of bucket start times to report; may wrap
    /// past midnight. `None` reports the whole day.
    pub time_of_day: Option<(NaiveTime, NaiveTime)>,
    pub miles_per_sensor: f64,
    pub weighting: SampleWeighting,
}

impl CommuteQuery {
    /// A query with 15-minute buckets, Pacific standard time, every weekday
    /// and uniform weighting.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        CommuteQuery {
            from,
            to,
            bucket_minutes: 15,
            utc_offset: FixedOffset::west_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            weekdays: None,
            time_of_day: None,
            miles_per_sensor: DEFAULT_MILES_PER_SENSOR,
            weighting: SampleWeighting::Uniform,
        }
    }

    /// The `days` days up to `to`.
    pub fn last_days(to: DateTime<Utc>, days: i64) -> Self {
        Self::new(to - Duration::days(days), to)
    }

    pub fn with_bucket_minutes(mut self, minutes: u32) -> Self {
        self.bucket_minutes = minutes;
        self
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_weekdays(mut self, weekdays: Vec<Weekday>) -> Self {
        self.weekdays = Some(weekdays);
        self
    }

    pub fn with_time_of_day(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.time_of_day = Some((start, end));
        self
    }

    pub fn with_miles_per_sensor(mut self, miles: f64) -> Self {
        self.miles_per_sensor = miles;
        self
    }

    pub fn with_weighting(mut self, weighting: SampleWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.from >= self.to {
            return Err(QueryError::EmptyWindow {
                from: self.from.to_rfc3339(),
                to: self.to.to_rfc3339(),
            });
        }
        if self.bucket_minutes == 0 || MINUTES_PER_DAY % self.bucket_minutes != 0 {
            return Err(QueryError::InvalidBucket(self.bucket_minutes));
        }
        if !(self.miles_per_sensor.is_finite() && self.miles_per_sensor > 0.0) {
            return Err(QueryError::InvalidSpacing(self.miles_per_sensor));
        }
        if let SampleWeighting::RecencyHalfLife { half_life_days } = self.weighting {
            if !(half_life_days.is_finite() && half_life_days > 0.0) {
                return Err(QueryError::InvalidHalfLife(half_life_days));
            }
        }
        Ok(())
    }

    pub fn buckets_per_day(&self) -> u32 {
        MINUTES_PER_DAY / self.bucket_minutes
    }

    /// Bucket index of a capture time, or `None` if its local weekday or
    /// time of day is filtered out.
    pub fn bucket_of(&self, at: DateTime<Utc>) -> Option<u32> {
        let local = at.with_timezone(&self.utc_offset);
        if let Some(weekdays) = &self.weekdays {
            if !weekdays.contains(&local.weekday()) {
                return None;
            }
        }
        let bucket = local.num_seconds_from_midnight() / 60 / self.bucket_minutes;
        self.includes_bucket(bucket).then_some(bucket)
    }

    pub fn includes_bucket(&self, bucket: u32) -> bool {
        let Some((start, end)) = self.time_of_day else {
            return true;
        };
        let minute = bucket * self.bucket_minutes;
        let start = start.num_seconds_from_midnight() / 60;
        let end = end.num_seconds_from_midnight() / 60;
        if start <= end {
            start <= minute && minute < end
        } else {
            minute >= start || minute < end
        }
    }
}

/// A fixed time-of-day interval, shared by every day in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub index: u32,
    pub start: NaiveTime,
    pub minutes: u32,
}

impl TimeBucket {
    pub fn new(index: u32, minutes: u32) -> Self {
        let start = NaiveTime::from_num_seconds_from_midnight_opt(index * minutes * 60, 0)
            .unwrap_or(NaiveTime::MIN);
        TimeBucket {
            index,
            start,
            minutes,
        }
    }

    pub fn label(&self) -> String {
        self.start.format("%H:%M").to_string()
    }
}

/// Statistics of a bucket that had data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub mean_speed_mph: f64,
    pub median_speed_mph: f64,
    pub implied_duration_minutes: f64,
    pub duration_variance: f64,
    /// True if any reading of the route in this bucket referenced an
    /// active incident.
    pub incident_adjusted: bool,
    /// Non-null readings.
    pub sample_count: usize,
    /// All readings, null or not.
    pub reading_count: usize,
    pub poll_count: usize,
    pub slowest_sensor_mph: f64,
    pub congestion: CongestionLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficientData {
    /// No non-null reading on the route in this bucket.
    NoSamples,
    /// A segment has neither readings nor a speed limit to fall back on.
    SegmentUncovered { segment: usize },
    /// Samples exist but recency weighting left them no weight.
    NegligibleWeight { sample_count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BucketOutcome {
    Stats(BucketStats),
    NotEnoughData {
        reason: InsufficientData,
        reading_count: usize,
    },
}

impl BucketOutcome {
    pub fn stats(&self) -> Option<&BucketStats> {
        match self {
            BucketOutcome::Stats(stats) => Some(stats),
            BucketOutcome::NotEnoughData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketReport {
    pub bucket: TimeBucket,
    #[serde(flatten)]
    pub outcome: BucketOutcome,
}

/// A departure bucket in recommendation order (rank 1 is best).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub rank: usize,
    pub bucket: TimeBucket,
    pub implied_duration_minutes: f64,
    pub duration_variance: f64,
    pub mean_speed_mph: f64,
    pub incident_adjusted: bool,
}

/// Aggregation result for one route, uploaded or written as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommuteReport {
    pub schema_version: u8,
    pub route: String,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub bucket_minutes: u32,
    pub utc_offset_minutes: i32,
    pub buckets: Vec<BucketReport>,
    pub recommendations: Vec<Recommendation>,
}

impl CommuteReport {
    pub fn bucket(&self, index: u32) -> Option<&BucketReport> {
        self.buckets.iter().find(|b| b.bucket.index == index)
    }
}

/// All reports of one run, written as a single JSON document.
#[derive(Debug, Serialize)]
pub struct CommuteIndex {
    pub generated_at: DateTime<Utc>,
    pub reports: Vec<CommuteReport>,
}
