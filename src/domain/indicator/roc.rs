//! Rate of Change.
//!
//! momentum = V[i] - V[i-n]; ROC = 100 * momentum / V[i-n]. The first n
//! positions are undefined, and ROC is undefined over a zero base.

use std::fmt;
use std::marker::PhantomData;

use chrono::NaiveDateTime;

use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::{nan_to_none, validate_period};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RocResult {
    pub timestamp: NaiveDateTime,
    pub momentum: Option<f64>,
    pub roc: Option<f64>,
}

impl Series for RocResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for RocResult {
    fn value(&self) -> f64 {
        self.roc.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for RocResult {
    const COLUMNS: &'static [&'static str] = &["momentum", "roc"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.momentum, self.roc]
    }
}

fn roc_at<T: Reusable>(inputs: &[T], i: usize, period: usize) -> RocResult {
    let timestamp = inputs[i].timestamp();
    if i < period {
        return RocResult {
            timestamp,
            momentum: None,
            roc: None,
        };
    }
    let base = inputs[i - period].value();
    let momentum = inputs[i].value() - base;
    RocResult {
        timestamp,
        momentum: nan_to_none(momentum),
        roc: if base == 0.0 {
            None
        } else {
            nan_to_none(100.0 * momentum / base)
        },
    }
}

pub fn calculate_roc<T: Reusable + 'static>(
    inputs: &[T],
    period: usize,
) -> Result<Vec<RocResult>, HubError> {
    Ok(Roc::<T>::new(period)?.compute_series(inputs))
}

pub struct Roc<T = Quote> {
    period: usize,
    _input: PhantomData<fn(&T)>,
}

impl<T> Roc<T> {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("ROC", "period", period, 1)?;
        Ok(Self {
            period,
            _input: PhantomData,
        })
    }
}

impl<T> Clone for Roc<T> {
    fn clone(&self) -> Self {
        Self {
            period: self.period,
            _input: PhantomData,
        }
    }
}

impl<T> fmt::Display for Roc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROC({})", self.period)
    }
}

impl<T: Reusable + 'static> Indicator for Roc<T> {
    type Input = T;
    type Output = RocResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, T, RocResult>,
        item: &T,
        index_hint: Option<usize>,
    ) -> Result<(RocResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        Ok((roc_at(ctx.inputs(), i, self.period), i))
    }

    fn rollback_state(&mut self, _ctx: &Context<'_, T, RocResult>, _index: usize) {}

    fn compute_series(&self, inputs: &[T]) -> Vec<RocResult> {
        (0..inputs.len())
            .map(|i| roc_at(inputs, i, self.period))
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period
    }
}
