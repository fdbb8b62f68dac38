//! Shared helper functions for indicator calculations.
//!
//! Batch functions and hub formulas both go through these, so a streamed
//! result is bit-for-bit the batch result.

use crate::domain::error::HubError;

/// Undefined values are stored as `None`, never as `NaN`.
pub fn nan_to_none(value: f64) -> Option<f64> {
    if value.is_nan() { None } else { Some(value) }
}

/// EMA smoothing factor, 2 / (n + 1).
pub fn ema_k(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

pub fn ema_increment(k: f64, prev: f64, value: f64) -> f64 {
    prev + k * (value - prev)
}

/// Wilder smoothing: (prev * (n - 1) + value) / n
pub fn wilder_increment(period: usize, prev: f64, value: f64) -> f64 {
    (prev * (period - 1) as f64 + value) / period as f64
}

/// Arithmetic mean, summed in iteration order. `NaN` for an empty window.
pub fn window_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Fails unless `value >= min`.
pub fn validate_period(
    indicator: &str,
    name: &str,
    value: usize,
    min: usize,
) -> Result<(), HubError> {
    if value < min {
        return Err(HubError::invalid_parameter(
            indicator,
            name,
            format!("must be at least {min}, got {value}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_maps_to_none() {
        assert_eq!(nan_to_none(f64::NAN), None);
        assert_eq!(nan_to_none(1.5), Some(1.5));
    }

    #[test]
    fn ema_factor() {
        assert!((ema_k(3) - 0.5).abs() < f64::EPSILON);
        assert!((ema_increment(0.5, 10.0, 20.0) - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn wilder_smoothing() {
        let seed = 10.0;
        let expected = (seed * 2.0 + 10.0) / 3.0;
        assert!((wilder_increment(3, seed, 10.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn mean_of_window() {
        assert!((window_mean([1.0, 2.0, 3.0]) - 2.0).abs() < f64::EPSILON);
        assert!(window_mean(std::iter::empty()).is_nan());
        assert!(window_mean([1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn period_validation() {
        assert!(validate_period("SMA", "period", 1, 1).is_ok());
        let err = validate_period("SMA", "period", 0, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid parameter for SMA: period must be at least 1, got 0"
        );
    }
}
