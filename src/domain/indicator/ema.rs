//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the SMA of the first n values, then
//! EMA[i] = EMA[i-1] + k * (V[i] - EMA[i-1]). The first (n-1) positions are
//! undefined. An undefined EMA reseeds from the trailing SMA.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, RollingWindow};
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator::sma::sma_at;
use crate::domain::indicator_helpers::{ema_increment, ema_k, nan_to_none, validate_period};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmaResult {
    pub timestamp: NaiveDateTime,
    pub ema: Option<f64>,
}

impl Series for EmaResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for EmaResult {
    fn value(&self) -> f64 {
        self.ema.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for EmaResult {
    const COLUMNS: &'static [&'static str] = &["ema"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.ema]
    }
}

/// EMA at `i` given the EMA at `i - 1`.
pub(crate) fn ema_next<T: Reusable>(
    inputs: &[T],
    i: usize,
    period: usize,
    k: f64,
    prev: Option<f64>,
) -> Option<f64> {
    if i + 1 < period {
        return None;
    }
    match prev {
        Some(p) => nan_to_none(ema_increment(k, p, inputs[i].value())),
        None => sma_at(inputs, i, period),
    }
}

pub fn calculate_ema<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
) -> Result<Vec<EmaResult>, HubError> {
    Ok(Ema::<T>::new(period)?.compute_series(inputs))
}

/// Hub formula. State is the last EMA, restored from the cached record.
pub struct Ema<T = Quote> {
    period: usize,
    k: f64,
    last: Option<f64>,
    _input: PhantomData<fn(&T)>,
}

impl<T> Ema<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("EMA", "period", period, 1)?;
        Ok(Self {
            period,
            k: ema_k(period),
            last: None,
            _input: PhantomData,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl<T> Clone for Ema<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            k: self.k,
            last: self.last,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Ema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EMA({})", self.period)
    }
}

impl<T: Reusable + 'static> Indicator for Ema<T> {
    type Input = T;
    type Output = EmaResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, EmaResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(EmaResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        let ema = ema_next(ctx.inputs(), i, self.period, self.k, self.last);
        self.last = ema;
        Ok((
            EmaResult {
                timestamp: item.timestamp(),
                ema,
            },
            i,
        ))
    }

    fn rollback_state(&mut self, ctx: &Context<'_, T, EmaResult>, index: usize) {
        self.last = ctx.prev_result(index).and_then(|r| r.ema);
    }

    fn compute_series(&self, inputs: &[T]) -> Vec<EmaResult> {
        let mut prev = None;
        inputs
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let ema = ema_next(inputs, i, self.period, self.k, prev);
                prev = ema;
                EmaResult {
                    timestamp: r.timestamp(),
                    ema,
                }
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }
}

/// Incremental EMA over raw values; shared by the EMA and MACD buffers.
#[derive(Debug, Clone)]
pub(crate) struct EmaEngine {
    k: f64,
    window: RollingWindow,
    count: usize,
    last: Option<f64>,
}

impl EmaEngine {
    pub(crate) fn new(period: usize) -> Self {
        Self {
            k: ema_k(period),
            window: RollingWindow::new(period),
            count: 0,
            last: None,
        }
    }

    pub(crate) fn step(&mut self, value: f64) -> Option<f64> {
        self.window.push(value);
        self.count += 1;
        if self.count < self.window.capacity() {
            return None;
        }
        let ema = match self.last {
            Some(p) => nan_to_none(ema_increment(self.k, p, value)),
            None => nan_to_none(self.window.mean()),
        };
        self.last = ema;
        ema
    }

    pub(crate) fn reset(&mut self) {
        self.window.clear();
        self.count = 0;
        self.last = None;
    }
}

#[derive(Debug, Clone)]
pub struct EmaBuffer<T = Quote> {
    engine: EmaEngine,
    _input: PhantomData<fn(&T)>,
}

impl<T> EmaBuffer<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("EMA", "period", period, 1)?;
        Ok(Self {
            engine: EmaEngine::new(period),
            _input: PhantomData,
        })
    }
}

impl<T: Reusable + Clone> BufferIndicator for EmaBuffer<T> {
    type Input = T;
    type Output = EmaResult;

    fn next(&mut self, input: &T) -> EmaResult {
        EmaResult {
            timestamp: input.timestamp(),
            ema: self.engine.step(input.value()),
        }
    }

    fn reset(&mut self) {
        self.engine.reset();
    }
}
