//! Bollinger Bands.
//!
//! Middle = SMA(n), upper/lower = middle +/- k * population std dev.
//! %B = (V - lower) / (upper - lower), width = (upper - lower) / middle.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, RollingWindow};
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator::stddev::mean_and_std_dev;
use crate::domain::indicator_helpers::{nan_to_none, validate_period, window_mean};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BollingerResult {
    pub timestamp: NaiveDateTime,
    pub sma: Option<f64>,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub percent_b: Option<f64>,
    pub z_score: Option<f64>,
    pub width: Option<f64>,
}

impl Series for BollingerResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for BollingerResult {
    fn value(&self) -> f64 {
        self.percent_b.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for BollingerResult {
    const COLUMNS: &'static [&'static str] =
        &["sma", "upper_band", "lower_band", "percent_b", "z_score", "width"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![
            self.sma,
            self.upper_band,
            self.lower_band,
            self.percent_b,
            self.z_score,
            self.width,
        ]
    }
}

fn bands(timestamp: NaiveDateTime, value: f64, mean: f64, sd: f64, multiplier: f64) -> BollingerResult {
    let upper = mean + multiplier * sd;
    let lower = mean - multiplier * sd;
    BollingerResult {
        timestamp,
        sma: nan_to_none(mean),
        upper_band: nan_to_none(upper),
        lower_band: nan_to_none(lower),
        percent_b: if upper == lower {
            None
        } else {
            nan_to_none((value - lower) / (upper - lower))
        },
        z_score: if sd == 0.0 {
            None
        } else {
            nan_to_none((value - mean) / sd)
        },
        width: if mean == 0.0 {
            None
        } else {
            nan_to_none((upper - lower) / mean)
        },
    }
}

fn undefined(timestamp: NaiveDateTime) -> BollingerResult {
    BollingerResult {
        timestamp,
        sma: None,
        upper_band: None,
        lower_band: None,
        percent_b: None,
        z_score: None,
        width: None,
    }
}

fn validate(period: usize, multiplier: f64) -> Result<(), HubError> {
    validate_period("BB", "period", period, 2)?;
    if !(multiplier > 0.0) || !multiplier.is_finite() {
        return Err(HubError::invalid_parameter(
            "BB",
            "multiplier",
            format!("must be a positive number, got {multiplier}"),
        ));
    }
    Ok(())
}

pub fn calculate_bollinger<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
    multiplier: f64,
) -> Result<Vec<BollingerResult>, HubError> {
    Ok(Bollinger::<T>::new(period, multiplier)?.compute_series(inputs))
}

/// Hub formula. Stateless: every position reads its own window.
pub struct Bollinger<T = Quote> {
    period: usize,
    multiplier: f64,
    _input: PhantomData<fn(&T)>,
}

impl<T> Bollinger<T> {
    pub fn new(period: usize, multiplier: f64) -> Result<Self, HubError> {
        validate(period, multiplier)?;
        Ok(Self {
            period,
            multiplier,
            _input: PhantomData,
        })
    }

    fn at(&self, inputs: &[T], i: usize) -> BollingerResult
    where
        T: Reusable,
    {
        let timestamp = inputs[i].timestamp();
        if i + 1 < self.period {
            return undefined(timestamp);
        }
        let window = inputs[i + 1 - self.period..=i].iter().map(|r| r.value());
        let (mean, sd) = mean_and_std_dev(window);
        bands(timestamp, inputs[i].value(), mean, sd, self.multiplier)
    }
}

impl<T> Clone for Bollinger<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            multiplier: self.multiplier,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Bollinger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BB({},{})", self.period, self.multiplier)
    }
}

impl<T: Reusable + 'static> Indicator for Bollinger<T> {
    type Input = T;
    type Output = BollingerResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, BollingerResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(BollingerResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        Ok((self.at(ctx.inputs(), i), i))
    }

    fn rollback_state(&mut self, _ctx: &Context<'_, T, BollingerResult>, _index: usize) {}

    fn compute_series(&self, inputs: &[T]) -> Vec<BollingerResult> {
        (0..inputs.len()).map(|i| self.at(inputs, i)).collect()
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }
}

/// Buffer engine. The mean comes from a rolling sum; the deviation still
/// needs one pass over the window.
#[derive(Debug, Clone)]
pub struct BollingerBuffer<T = Quote> {
    multiplier: f64,
    window: RollingWindow,
    _input: PhantomData<fn(&T)>,
}

impl<T> BollingerBuffer<T> {
    pub fn new(period: usize, multiplier: f64) -> Result<Self, HubError> {
        validate(period, multiplier)?;
        Ok(Self {
            multiplier,
            window: RollingWindow::new(period),
            _input: PhantomData,
        })
    }
}

impl<T: Reusable + Clone> BufferIndicator for BollingerBuffer<T> {
    type Input = T;
    type Output = BollingerResult;

    fn next(&mut self, input: &T) -> BollingerResult {
        let value = input.value();
        self.window.push(value);
        if !self.window.is_full() {
            return undefined(input.timestamp());
        }
        let mean = self.window.mean();
        let variance = window_mean(self.window.iter().map(|v| (v - mean) * (v - mean)));
        bands(input.timestamp(), value, mean, variance.sqrt(), self.multiplier)
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::buffer::BufferList;
    use crate::domain::indicator::test_support::values;
    use approx::assert_relative_eq;

    #[test]
    fn bands_around_mean() {
        let series =
            calculate_bollinger(&values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 8, 2.0)
                .unwrap();
        let last = &series[7];
        assert_relative_eq!(last.sma.unwrap(), 5.0);
        assert_relative_eq!(last.upper_band.unwrap(), 9.0);
        assert_relative_eq!(last.lower_band.unwrap(), 1.0);
        assert_relative_eq!(last.percent_b.unwrap(), 1.0);
        assert_relative_eq!(last.width.unwrap(), 8.0 / 5.0);
        assert!(series[6].sma.is_none());
    }

    #[test]
    fn flat_series_has_no_percent_b() {
        let series = calculate_bollinger(&values(&[3.0; 4]), 2, 2.0).unwrap();
        assert_eq!(series[3].upper_band, Some(3.0));
        assert_eq!(series[3].percent_b, None);
        assert_eq!(series[3].z_score, None);
    }

    #[test]
    fn invalid_parameters_rejected() {
        assert!(Bollinger::<Quote>::new(1, 2.0).is_err());
        assert!(Bollinger::<Quote>::new(20, 0.0).is_err());
        assert!(Bollinger::<Quote>::new(20, f64::NAN).is_err());
    }

    #[test]
    fn display_name() {
        assert_eq!(Bollinger::<Quote>::new(20, 2.0).unwrap().to_string(), "BB(20,2)");
        assert_eq!(Bollinger::<Quote>::new(20, 2.5).unwrap().to_string(), "BB(20,2.5)");
    }

    #[test]
    fn buffer_matches_batch() {
        let inputs = values(&[5.0, 7.0, 6.0, 9.0, 8.0, 4.0, 3.0, 6.0, 7.0, 9.0, 10.0]);
        let batch = calculate_bollinger(&inputs, 4, 2.0).unwrap();
        let mut list = BufferList::new(BollingerBuffer::new(4, 2.0).unwrap());
        list.add_batch(inputs);
        for (b, s) in batch.iter().zip(list.iter()) {
            for (x, y) in b.row().into_iter().zip(s.row()) {
                match (x, y) {
                    (Some(x), Some(y)) => assert_relative_eq!(x, y, epsilon = 1e-9),
                    (x, y) => assert_eq!(x, y),
                }
            }
        }
    }
}
