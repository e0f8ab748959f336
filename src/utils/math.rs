//! Mathematical utility functions

/// Clamp a score into [0, 100]; NaN collapses to 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Clamp a score into [0, 1]; NaN collapses to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Weighted mean of `(value, weight)` pairs
///
/// Non-positive weights are ignored. When no pair carries a positive weight
/// the plain mean is returned; empty input yields 0.0.
pub fn weighted_average<I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (mut sum, mut total_weight) = (0.0, 0.0);
    let (mut plain_sum, mut count) = (0.0, 0usize);
    for (value, weight) in pairs {
        plain_sum += value;
        count += 1;
        if weight > 0.0 {
            sum += value * weight;
            total_weight += weight;
        }
    }
    if total_weight > 0.0 {
        sum / total_weight
    } else if count > 0 {
        plain_sum / count as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps() {
        assert_eq!(clamp_percent(140.0), 100.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.2), 1.0);
        assert_eq!(clamp_unit(0.4), 0.4);
    }

    #[test]
    fn weighted_mean() {
        assert_eq!(weighted_average(Vec::new()), 0.0);
        assert_eq!(weighted_average([(80.0, 1.0), (60.0, 1.0)]), 70.0);
        assert_eq!(weighted_average([(90.0, 3.0), (50.0, 1.0)]), 80.0);
        assert_eq!(weighted_average([(90.0, 3.0), (10.0, 0.0)]), 90.0);
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        assert_eq!(weighted_average([(90.0, 0.0)]), 90.0);
        assert_eq!(weighted_average([(90.0, 0.0), (70.0, -1.0)]), 80.0);
    }
}
