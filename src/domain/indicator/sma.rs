//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(V[i-n+1..=i]). The first (n-1) positions are undefined.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, RollingWindow};
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::{nan_to_none, validate_period, window_mean};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmaResult {
    pub timestamp: NaiveDateTime,
    pub sma: Option<f64>,
}

impl Series for SmaResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for SmaResult {
    fn value(&self) -> f64 {
        self.sma.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for SmaResult {
    const COLUMNS: &'static [&'static str] = &["sma"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.sma]
    }
}

/// Mean of the `period` values ending at `i`, if that many exist.
pub(crate) fn sma_at<T: Reusable>(inputs: &[T], i: usize, period: usize) -> Option<f64> {
    if i + 1 < period {
        return None;
    }
    nan_to_none(window_mean(inputs[i + 1 - period..=i].iter().map(|r| r.value())))
}

pub fn calculate_sma<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
) -> Result<Vec<SmaResult>, HubError> {
    Ok(Sma::<T>::new(period)?.compute_series(inputs))
}

/// Hub formula. Stateless: every position reads its own window.
pub struct Sma<T = Quote> {
    period: usize,
    _input: PhantomData<fn(&T)>,
}

impl<T> Sma<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("SMA", "period", period, 1)?;
        Ok(Self {
            period,
            _input: PhantomData,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl<T> Clone for Sma<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Sma<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SMA({})", self.period)
    }
}

impl<T: Reusable + 'static> Indicator for Sma<T> {
    type Input = T;
    type Output = SmaResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, SmaResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(SmaResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        let result = SmaResult {
            timestamp: item.timestamp(),
            sma: sma_at(ctx.inputs(), i, self.period),
        };
        Ok((result, i))
    }

    fn rollback_state(&mut self, _ctx: &Context<'_, T, SmaResult>, _index: usize) {}

    fn compute_series(&self, inputs: &[T]) -> Vec<SmaResult> {
        (0..inputs.len())
            .map(|i| SmaResult {
                timestamp: inputs[i].timestamp(),
                sma: sma_at(inputs, i, self.period),
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }
}

/// Buffer engine keeping a rolling sum.
#[derive(Debug, Clone)]
pub struct SmaBuffer<T = Quote> {
    window: RollingWindow,
    _input: PhantomData<fn(&T)>,
}

impl<T> SmaBuffer<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("SMA", "period", period, 1)?;
        Ok(Self {
            window: RollingWindow::new(period),
            _input: PhantomData,
        })
    }
}

impl<T: Reusable + Clone> BufferIndicator for SmaBuffer<T> {
    type Input = T;
    type Output = SmaResult;

    fn next(&mut self, input: &T) -> SmaResult {
        self.window.push(input.value());
        let sma = if self.window.is_full() {
            nan_to_none(self.window.mean())
        } else {
            None
        };
        SmaResult {
            timestamp: input.timestamp(),
            sma,
        }
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
    fn sma_warmup() {
        let series = calculate_sma(&values(&[10.0, 20.0, 30.0, 40.0, 50.0]), 3).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series[0].sma, None);
        assert_eq!(series[1].sma, None);
        assert_eq!(series[2].sma, Some(20.0));
        assert_eq!(series[3].sma, Some(30.0));
        assert_eq!(series[4].sma, Some(40.0));
    }

    #[test]
    fn sma_period_1_is_identity() {
        let series = calculate_sma(&values(&[3.0, 7.0]), 1).unwrap();
        assert_eq!(series[0].sma, Some(3.0));
        assert_eq!(series[1].sma, Some(7.0));
    }

    #[test]
    fn sma_nan_window_is_undefined() {
        let series = calculate_sma(&values(&[1.0, f64::NAN, 3.0, 4.0, 5.0]), 2).unwrap();
        assert_eq!(series[1].sma, None);
        assert_eq!(series[2].sma, None);
        assert_eq!(series[3].sma, Some(3.5));
    }

    #[test]
    fn sma_zero_period_rejected() {
        let err = calculate_sma(&values(&[1.0]), 0).unwrap_err();
        assert!(matches!(err, HubError::InvalidParameter { .. }));
    }

    #[test]
    fn sma_empty_input() {
        assert!(calculate_sma(&values(&[]), 5).unwrap().is_empty());
    }

    #[test]
    fn sma_buffer_matches_batch() {
        let inputs = values(&[1.0, 4.0, 2.0, 8.0, 5.0, 7.0, f64::NAN, 3.0, 6.0, 9.0]);
        let batch = calculate_sma(&inputs, 3).unwrap();
        let mut list = BufferList::new(SmaBuffer::new(3).unwrap());
        list.add_batch(inputs);
        for (b, s) in batch.iter().zip(list.iter()) {
            match (b.sma, s.sma) {
                (Some(x), Some(y)) => assert_relative_eq!(x, y, epsilon = 1e-9),
                (x, y) => assert_eq!(x, y),
            }
        }
    }

    #[test]
    fn display_name() {
        assert_eq!(Sma::<Quote>::new(20).unwrap().to_string(), "SMA(20)");
    }
}
