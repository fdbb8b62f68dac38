//! Standard Deviation.
//!
//! Population standard deviation over the trailing n values, with the
//! window mean and the z-score of the current value. The first (n-1)
//! positions are undefined.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::RollingWindow;
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::{nan_to_none, validate_period, window_mean};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StdDevResult {
    pub timestamp: NaiveDateTime,
    pub std_dev: Option<f64>,
    pub mean: Option<f64>,
    pub z_score: Option<f64>,
}

impl Series for StdDevResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for StdDevResult {
    fn value(&self) -> f64 {
        self.std_dev.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for StdDevResult {
    const COLUMNS: &'static [&'static str] = &["std_dev", "mean", "z_score"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.std_dev, self.mean, self.z_score]
    }
}

/// Mean and population standard deviation of `window`, summed in order.
pub(crate) fn mean_and_std_dev<I>(window: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64> + Clone,
{
    let mean = window_mean(window.clone());
    let variance = window_mean(window.into_iter().map(|v| (v - mean) * (v - mean)));
    (mean, variance.sqrt())
}

fn stddev_result<I>(timestamp: NaiveDateTime, value: f64, window: I) -> StdDevResult
where
    I: IntoIterator<Item = f64> + Clone,
{
    let (mean, sd) = mean_and_std_dev(window);
    let z_score = if sd == 0.0 {
        None
    } else {
        nan_to_none((value - mean) / sd)
    };
    StdDevResult {
        timestamp,
        std_dev: nan_to_none(sd),
        mean: nan_to_none(mean),
        z_score,
    }
}

fn undefined(timestamp: NaiveDateTime) -> StdDevResult {
    StdDevResult {
        timestamp,
        std_dev: None,
        mean: None,
        z_score: None,
    }
}

pub fn calculate_stddev<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
) -> Result<Vec<StdDevResult>, HubError> {
    Ok(StdDev::<T>::new(period)?.compute_series(inputs))
}

/// Hub formula. State is the trailing value window; rollback refills it
/// from the provider.
pub struct StdDev<T = Quote> {
    period: usize,
    window: RollingWindow,
    _input: PhantomData<fn(&T)>,
}

impl<T> StdDev<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("STDDEV", "period", period, 2)?;
        Ok(Self {
            period,
            window: RollingWindow::new(period),
            _input: PhantomData,
        })
    }
}

impl<T> Clone for StdDev<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            window: self.window.clone(),
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for StdDev<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STDDEV({})", self.period)
    }
}

impl<T: Reusable + 'static> Indicator for StdDev<T> {
    type Input = T;
    type Output = StdDevResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, StdDevResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(StdDevResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        let value = item.value();
        self.window.push(value);
        let result = if self.window.is_full() {
            stddev_result(item.timestamp(), value, self.window.iter())
        } else {
            undefined(item.timestamp())
        };
        Ok((result, i))
    }

    fn rollback_state(&mut self, ctx: &Context<'_, T, StdDevResult>, index: usize) {
        self.window.clear();
        let inputs = ctx.inputs();
        for r in &inputs[index.saturating_sub(self.period)..index.min(inputs.len())] {
            self.window.push(r.value());
        }
    }

    fn compute_series(&self, inputs: &[T]) -> Vec<StdDevResult> {
        (0..inputs.len())
            .map(|i| {
                let timestamp = inputs[i].timestamp();
                if i + 1 < self.period {
                    return undefined(timestamp);
                }
                let window = &inputs[i + 1 - self.period..=i];
                stddev_result(timestamp, inputs[i].value(), window.iter().map(|r| r.value()))
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::values;
    use approx::assert_relative_eq;

    #[test]
    fn stddev_warmup() {
        let series = calculate_stddev(&values(&[10.0, 20.0, 30.0, 40.0, 50.0]), 3).unwrap();
        assert_eq!(series[0].std_dev, None);
        assert_eq!(series[1].std_dev, None);
        assert!(series[2].std_dev.is_some());
    }

    #[test]
    fn stddev_known_value() {
        let series =
            calculate_stddev(&values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 8).unwrap();
        assert_relative_eq!(series[7].std_dev.unwrap(), 2.0);
        assert_relative_eq!(series[7].mean.unwrap(), 5.0);
        assert_relative_eq!(series[7].z_score.unwrap(), 2.0);
    }

    #[test]
    fn stddev_constant_has_no_z_score() {
        let series = calculate_stddev(&values(&[100.0; 5]), 3).unwrap();
        assert_eq!(series[4].std_dev, Some(0.0));
        assert_eq!(series[4].mean, Some(100.0));
        assert_eq!(series[4].z_score, None);
    }

    #[test]
    fn stddev_period_below_two_rejected() {
        assert!(calculate_stddev(&values(&[1.0]), 1).is_err());
    }
}
