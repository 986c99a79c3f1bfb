use serde::Serialize;

/// Coarse traffic state of a bucket, judged by its slowest sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    Free,
    Slow,
    Congested,
}

/// Converts a speed into a congestion level.
///
/// | Speed (mph) | Level       |
/// |-------------|-------------|
/// | >= 50       | `Free`      |
/// | >= 30       | `Slow`      |
/// | < 30        | `Congested` |
pub fn grade(speed_mph: f64) -> CongestionLevel {
    match speed_mph {
        s if s >= 50.0 => CongestionLevel::Free,
        s if s >= 30.0 => CongestionLevel::Slow,
        _ => CongestionLevel::Congested,
    }
}
