/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of the values; the mean of the middle pair for even counts.
/// Returns 0.0 for empty input.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Weighted mean of `(value, weight)` pairs, `None` when the weights sum to
/// zero.
pub fn weighted_mean(samples: &[(f64, f64)]) -> Option<f64> {
    let weight_sum: f64 = samples.iter().map(|(_, w)| w).sum();
    if weight_sum <= 0.0 {
        return None;
    }
    Some(samples.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum)
}

/// Weighted population variance given a pre-computed weighted mean.
/// Returns 0.0 when the weights sum to zero.
pub fn weighted_variance(samples: &[(f64, f64)], mean: f64) -> f64 {
    let weight_sum: f64 = samples.iter().map(|(_, w)| w).sum();
    if weight_sum == 0.0 {
        return 0.0;
    }
    samples
        .iter()
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum::<f64>()
        / weight_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[60.0, 40.0]), 50.0);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[70.0, 20.0, 60.0]), 60.0);
        assert_eq!(median(&[70.0, 60.0]), 65.0);
    }

    #[test]
    fn test_weighted_mean_and_variance() {
        let uniform = [(10.0, 1.0), (20.0, 1.0)];
        let m = weighted_mean(&uniform).unwrap();
        assert_eq!(m, 15.0);
        assert_eq!(weighted_variance(&uniform, m), 25.0);

        let skewed = [(10.0, 3.0), (20.0, 1.0)];
        assert_eq!(weighted_mean(&skewed), Some(12.5));
    }

    #[test]
    fn test_weighted_mean_without_weight() {
        assert_eq!(weighted_mean(&[]), None);
        assert_eq!(weighted_mean(&[(10.0, 0.0), (20.0, 0.0)]), None);
    }
}
