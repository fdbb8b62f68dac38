//! Moving Average Convergence/Divergence.
//!
//! MACD = EMA(fast) - EMA(slow); signal = EMA(signal) of the MACD line,
//! seeded with the mean of its first `signal` values; histogram =
//! MACD - signal. The line is defined from position `slow - 1`, the signal
//! from `slow + signal - 2`.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::BufferIndicator;
use crate::domain::cache::CacheView;
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator::ema::{EmaEngine, ema_next};
use crate::domain::indicator_helpers::{
    ema_increment, ema_k, nan_to_none, validate_period, window_mean,
};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacdResult {
    pub timestamp: NaiveDateTime,
    pub macd: Option<f64>,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
    pub fast_ema: Option<f64>,
    pub slow_ema: Option<f64>,
}

impl Series for MacdResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for MacdResult {
    fn value(&self) -> f64 {
        self.macd.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for MacdResult {
    const COLUMNS: &'static [&'static str] =
        &["macd", "signal", "histogram", "fast_ema", "slow_ema"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![
            self.macd,
            self.signal,
            self.histogram,
            self.fast_ema,
            self.slow_ema,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MacdParams {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdParams {
    fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, HubError> {
        validate_period("MACD", "fast", fast, 1)?;
        validate_period("MACD", "signal", signal, 1)?;
        if slow <= fast {
            return Err(HubError::invalid_parameter(
                "MACD",
                "slow",
                format!("must be greater than fast ({fast}), got {slow}"),
            ));
        }
        Ok(Self { fast, slow, signal })
    }

    /// The result at `i`, reading the results for `..i` from `results`.
    fn step<T: Reusable>(
        &self,
        inputs: &[T],
        i: usize,
        results: CacheView<'_, MacdResult>,
    ) -> MacdResult {
        let prev = i.checked_sub(1).and_then(|p| results.get(p));
        let fast_ema = ema_next(
            inputs,
            i,
            self.fast,
            ema_k(self.fast),
            prev.and_then(|r| r.fast_ema),
        );
        let slow_ema = ema_next(
            inputs,
            i,
            self.slow,
            ema_k(self.slow),
            prev.and_then(|r| r.slow_ema),
        );
        let macd = match (fast_ema, slow_ema) {
            (Some(f), Some(s)) => nan_to_none(f - s),
            _ => None,
        };

        let signal = macd.and_then(|m| match prev.and_then(|r| r.signal) {
            Some(p) => nan_to_none(ema_increment(ema_k(self.signal), p, m)),
            None => self.seed_signal(i, m, results),
        });

        MacdResult {
            timestamp: inputs[i].timestamp(),
            macd,
            signal,
            histogram: macd.zip(signal).map(|(m, s)| m - s),
            fast_ema,
            slow_ema,
        }
    }

    /// Mean of the last `signal` MACD values ending with `macd` at `i`.
    fn seed_signal(&self, i: usize, macd: f64, results: CacheView<'_, MacdResult>) -> Option<f64> {
        if i + 1 < self.signal {
            return None;
        }
        let mut window = Vec::with_capacity(self.signal);
        for p in (i + 1 - self.signal)..i {
            window.push(results.get(p)?.macd?);
        }
        window.push(macd);
        nan_to_none(window_mean(window))
    }
}

pub fn calculate_macd<T: Reusable + 'static>(
    inputs: &[T],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<Vec<MacdResult>, HubError> {
    Ok(Macd::<T>::new(fast, slow, signal)?.compute_series(inputs))
}

/// Hub formula. Carries no state of its own: both EMAs and the signal are
/// read back from the previous cached record.
pub struct Macd<T = Quote> {
    params: MacdParams,
    _input: PhantomData<fn(&T)>,
}

impl<T> Macd<T> {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, HubError> {
        Ok(Self {
            params: MacdParams::new(fast, slow, signal)?,
            _input: PhantomData,
        })
    }
}

impl<T> Clone for Macd<T> {
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Macd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let MacdParams { fast, slow, signal } = self.params;
        write!(f, "MACD({fast},{slow},{signal})")
    }
}

impl<T: Reusable + 'static> Indicator for Macd<T> {
    type Input = T;
    type Output = MacdResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, MacdResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(MacdResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        Ok((self.params.step(ctx.inputs(), i, ctx.results()), i))
    }

    fn rollback_state(&mut self, _ctx: &Context<'_, T, MacdResult>, _index: usize) {}

    fn compute_series(&self, inputs: &[T]) -> Vec<MacdResult> {
        let mut results = Vec::with_capacity(inputs.len());
        for i in 0..inputs.len() {
            let result = self.params.step(inputs, i, CacheView::new(&[], results.as_slice()));
            results.push(result);
        }
        results
    }

    fn lookback(&self) -> usize {
        self.params.slow.max(self.params.signal) - 1
    }
}

/// Buffer engine: two EMA engines plus one over the MACD line.
#[derive(Debug, Clone)]
pub struct MacdBuffer<T = Quote> {
    fast: EmaEngine,
    slow: EmaEngine,
    signal: EmaEngine,
    _input: PhantomData<fn(&T)>,
}

impl<T> MacdBuffer<T> {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, HubError> {
        let params = MacdParams::new(fast, slow, signal)?;
        Ok(Self {
            fast: EmaEngine::new(params.fast),
            slow: EmaEngine::new(params.slow),
            signal: EmaEngine::new(params.signal),
            _input: PhantomData,
        })
    }
}

impl<T: Reusable + Clone> BufferIndicator for MacdBuffer<T> {
    type Input = T;
    type Output = MacdResult;

    fn next(&mut self, input: &T) -> MacdResult {
        let value = input.value();
        let fast_ema = self.fast.step(value);
        let slow_ema = self.slow.step(value);
        let macd = match (fast_ema, slow_ema) {
            (Some(f), Some(s)) => nan_to_none(f - s),
            _ => None,
        };
        let signal = self.signal.step(macd.unwrap_or(f64::NAN));
        MacdResult {
            timestamp: input.timestamp(),
            macd,
            signal,
            histogram: macd.zip(signal).map(|(m, s)| m - s),
            fast_ema,
            slow_ema,
        }
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
}
