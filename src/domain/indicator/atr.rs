//! Average True Range (Wilder).
//!
//! TR needs the previous close, so the first position has none. The first
//! ATR, at position n, is the mean of the n true ranges ending there; later
//! values are Wilder-smoothed. ATRP is ATR as a percentage of close.

use std::fmt;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, RollingWindow};
use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::{nan_to_none, validate_period, wilder_increment, window_mean};
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AtrResult {
    pub timestamp: NaiveDateTime,
    pub tr: Option<f64>,
    pub atr: Option<f64>,
    pub atrp: Option<f64>,
}

impl Series for AtrResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for AtrResult {
    fn value(&self) -> f64 {
        self.atr.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for AtrResult {
    const COLUMNS: &'static [&'static str] = &["tr", "atr", "atrp"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.tr, self.atr, self.atrp]
    }
}

fn true_range_at(quotes: &[Quote], i: usize) -> f64 {
    match i.checked_sub(1) {
        Some(p) => quotes[i].true_range(quotes[p].close),
        None => f64::NAN,
    }
}

fn atr_result(quote: &Quote, tr: f64, atr: Option<f64>) -> AtrResult {
    let atrp = atr.and_then(|a| {
        if quote.close == 0.0 {
            None
        } else {
            nan_to_none(a / quote.close * 100.0)
        }
    });
    AtrResult {
        timestamp: quote.timestamp,
        tr: nan_to_none(tr),
        atr,
        atrp,
    }
}

/// ATR at `i` given the ATR at `i - 1`.
fn atr_step(quotes: &[Quote], i: usize, period: usize, prev: Option<f64>) -> AtrResult {
    let tr = true_range_at(quotes, i);
    let atr = if i < period {
        None
    } else {
        match prev {
            Some(p) => nan_to_none(wilder_increment(period, p, tr)),
            None => nan_to_none(window_mean(
                (i + 1 - period..=i).map(|p| true_range_at(quotes, p)),
            )),
        }
    };
    atr_result(&quotes[i], tr, atr)
}

pub fn calculate_atr(quotes: &[Quote], period: usize) -> Result<Vec<AtrResult>, HubError> {
    Ok(Atr::new(period)?.compute_series(quotes))
}

/// Hub formula. State is the last ATR, restored from the cached record.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    last: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("ATR", "period", period, 1)?;
        Ok(Self { period, last: None })
    }
}

impl fmt::Display for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ATR({})", self.period)
    }
}

impl Indicator for Atr {
    type Input = Quote;
    type Output = AtrResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, Quote, AtrResult>,
        item: &Quote,
        index_hint: Option<usize>,
    ) -> Result<(AtrResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        let result = atr_step(ctx.inputs(), i, self.period, self.last);
        self.last = result.atr;
        Ok((result, i))
    }

    fn rollback_state(&mut self, ctx: &Context<'_, Quote, AtrResult>, index: usize) {
        self.last = ctx.prev_result(index).and_then(|r| r.atr);
    }

    fn compute_series(&self, quotes: &[Quote]) -> Vec<AtrResult> {
        let mut prev = None;
        (0..quotes.len())
            .map(|i| {
                let result = atr_step(quotes, i, self.period, prev);
                prev = result.atr;
                result
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        self.period
    }
}

/// Buffer engine with a rolling window of true ranges.
#[derive(Debug, Clone)]
pub struct AtrBuffer {
    period: usize,
    prev_close: Option<f64>,
    ranges: RollingWindow,
    count: usize,
    last: Option<f64>,
}

impl AtrBuffer {
    pub fn new(period: usize) -> Result<Self, HubError> {
        validate_period("ATR", "period", period, 1)?;
        Ok(Self {
            period,
            prev_close: None,
            ranges: RollingWindow::new(period),
            count: 0,
            last: None,
        })
    }
}

impl BufferIndicator for AtrBuffer {
    type Input = Quote;
    type Output = AtrResult;

    fn next(&mut self, quote: &Quote) -> AtrResult {
        let tr = self
            .prev_close
            .map_or(f64::NAN, |close| quote.true_range(close));
        if self.prev_close.is_some() {
            self.ranges.push(tr);
        }
        self.prev_close = Some(quote.close);
        self.count += 1;

        let atr = if self.count <= self.period {
            None
        } else {
            match self.last {
                Some(p) => nan_to_none(wilder_increment(self.period, p, tr)),
                None => nan_to_none(self.ranges.mean()),
            }
        };
        self.last = atr;
        atr_result(quote, tr, atr)
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.ranges.clear();
        self.count = 0;
        self.last = None;
    }
}
