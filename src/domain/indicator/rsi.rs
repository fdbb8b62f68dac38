//! Relative Strength Index (Wilder).
//!
//! The first average gain/loss is the mean over the first n changes; after
//! that both are Wilder-smoothed. RSI = 100 - 100 / (1 + avg_gain / avg_loss),
//! and 100 when there are no losses. The first n positions are undefined.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, RollingWindow};
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::{nan_to_none, validate_period, wilder_increment};
use crate::domain::quote::{Quote, Reusable, Series};

/// Running averages carried from one position to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WilderState {
    pub avg_gain: f64,
    pub avg_loss: f64,
}

impl WilderState {
    fn rsi(&self) -> Option<f64> {
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        nan_to_none(100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RsiResult {
    pub timestamp: NaiveDateTime,
    pub rsi: Option<f64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) state: Option<WilderState>,
}

impl Series for RsiResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for RsiResult {
    fn value(&self) -> f64 {
        self.rsi.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for RsiResult {
    const COLUMNS: &'static [&'static str] = &["rsi"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.rsi]
    }
}

/// Gain and loss of one change; both `NaN` if either end is.
fn gain_loss(prev: f64, value: f64) -> (f64, f64) {
    let change = value - prev;
    if change.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    (change.max(0.0), (-change).max(0.0))
}

fn checked(state: WilderState) -> Option<WilderState> {
    if state.avg_gain.is_nan() || state.avg_loss.is_nan() {
        None
    } else {
        Some(state)
    }
}

/// Wilder state at `i` given the state at `i - 1`.
fn rsi_state<T: Reusable>(
    inputs: &[T],
    i: usize,
    period: usize,
    prev: Option<WilderState>,
) -> Option<WilderState> {
    if i < period {
        return None;
    }
    match prev {
        Some(p) => {
            let (gain, loss) = gain_loss(inputs[i - 1].value(), inputs[i].value());
            checked(WilderState {
                avg_gain: wilder_increment(period, p.avg_gain, gain),
                avg_loss: wilder_increment(period, p.avg_loss, loss),
            })
        }
        None => {
            let mut sum_gain = 0.0;
            let mut sum_loss = 0.0;
            for p in (i + 1 - period)..=i {
                let (gain, loss) = gain_loss(inputs[p - 1].value(), inputs[p].value());
                sum_gain += gain;
                sum_loss += loss;
            }
            checked(WilderState {
                avg_gain: sum_gain / period as f64,
                avg_loss: sum_loss / period as f64,
            })
        }
    }
}

fn rsi_result(timestamp: NaiveDateTime, state: Option<WilderState>) -> RsiResult {
    RsiResult {
        timestamp,
        rsi: state.and_then(|s| s.rsi()),
        state,
    }
}

pub fn calculate_rsi<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
) -> Result<Vec<RsiResult>, HubError> {
    Ok(Rsi::<T>::new(period)?.compute_series(inputs))
}

/// Hub formula. State is the Wilder averages, restored from the cached
/// record.
pub struct Rsi<T = Quote> {
    period: usize,
    state: Option<WilderState>,
    _input: PhantomData<fn(&T)>,
}

impl<T> Rsi<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("RSI", "period", period, 1)?;
        Ok(Self {
            period,
            state: None,
            _input: PhantomData,
        })
    }
}

impl<T> Clone for Rsi<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            state: self.state,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Rsi<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSI({})", self.period)
    }
}

impl<T: Reusable + 'static> Indicator for Rsi<T> {
    type Input = T;
    type Output = RsiResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, RsiResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(RsiResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        self.state = rsi_state(ctx.inputs(), i, self.period, self.state);
        Ok((rsi_result(item.timestamp(), self.state), i))
    }

    fn rollback_state(&mut self, ctx: &Context<'_, T, RsiResult>, index: usize) {
        self.state = ctx.prev_result(index).and_then(|r| r.state);
    }

    fn compute_series(&self, inputs: &[T]) -> Vec<RsiResult> {
        let mut state = None;
        inputs
            .iter()
            .enumerate()
            .map(|(i, r)| {
                state = rsi_state(inputs, i, self.period, state);
                rsi_result(r.timestamp(), state)
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period
    }
}

/// Buffer engine: rolling gain/loss windows seed the averages.
#[derive(Debug, Clone)]
pub struct RsiBuffer<T = Quote> {
    period: usize,
    prev_value: Option<f64>,
    gains: RollingWindow,
    losses: RollingWindow,
    count: usize,
    state: Option<WilderState>,
    _input: PhantomData<fn(&T)>,
}

impl<T> RsiBuffer<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("RSI", "period", period, 1)?;
        Ok(Self {
            period,
            prev_value: None,
            gains: RollingWindow::new(period),
            losses: RollingWindow::new(period),
            count: 0,
            state: None,
            _input: PhantomData,
        })
    }
}

impl<T: Reusable + Clone> BufferIndicator for RsiBuffer<T> {
    type Input = T;
    type Output = RsiResult;

    fn next(&mut self, input: &T) -> RsiResult {
        let value = input.value();
        let change = self.prev_value.map(|prev| gain_loss(prev, value));
        if let Some((gain, loss)) = change {
            self.gains.push(gain);
            self.losses.push(loss);
        }
        self.prev_value = Some(value);
        self.count += 1;

        self.state = match (self.count > self.period, self.state, change) {
            (false, _, _) | (true, _, None) => None,
            (true, Some(p), Some((gain, loss))) => checked(WilderState {
                avg_gain: wilder_increment(self.period, p.avg_gain, gain),
                avg_loss: wilder_increment(self.period, p.avg_loss, loss),
            }),
            (true, None, Some(_)) => checked(WilderState {
                avg_gain: self.gains.mean(),
                avg_loss: self.losses.mean(),
            }),
        };
        rsi_result(input.timestamp(), self.state)
    }

    fn reset(&mut self) {
        self.prev_value = None;
        self.gains.clear();
        self.losses.clear();
        self.count = 0;
        self.state = None;
    }
}
