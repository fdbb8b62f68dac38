//! On-Balance Volume.
//!
//! OBV[0] = 0; then volume is added on an up close, subtracted on a down
//! close, and carried unchanged otherwise.

use std::fmt;

use chrono::NaiveDateTime;

use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::nan_to_none;
use crate::domain::quote::{Quote, Reusable, Series};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObvResult {
    pub timestamp: NaiveDateTime,
    pub obv: Option<f64>,
}

impl Series for ObvResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for ObvResult {
    fn value(&self) -> f64 {
        self.obv.unwrap_or(f64::NAN)
    }
}

impl ResultColumns for ObvResult {
    const COLUMNS: &'static [&'static str] = &["obv"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.obv]
    }
}

/// OBV at `i` given the OBV at `i - 1`.
fn obv_step(quotes: &[Quote], i: usize, prev: Option<f64>) -> Option<f64> {
    let Some(p) = i.checked_sub(1) else {
        return Some(0.0);
    };
    let (close, prev_close) = (quotes[i].close, quotes[p].close);
    let volume = quotes[i].volume;
    prev.and_then(|obv| {
        if close > prev_close {
            nan_to_none(obv + volume)
        } else if close < prev_close {
            nan_to_none(obv - volume)
        } else {
            Some(obv)
        }
    })
}

pub fn calculate_obv(quotes: &[Quote]) -> Result<Vec<ObvResult>, HubError> {
    Ok(Obv::new().compute_series(quotes))
}

/// Hub formula. State is the last OBV, restored from the cached record.
#[derive(Debug, Clone, Default)]
pub struct Obv {
    last: Option<f64>,
}

impl Obv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for Obv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OBV")
    }
}

impl Indicator for Obv {
    type Input = Quote;
    type Output = ObvResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, Quote, ObvResult>,
        item: &Quote,
        index_hint: Option<usize>,
    ) -> Result<(ObvResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        self.last = obv_step(ctx.inputs(), i, self.last);
        Ok((
            ObvResult {
                timestamp: item.timestamp,
                obv: self.last,
            },
            i,
        ))
    }

    fn rollback_state(&mut self, ctx: &Context<'_, Quote, ObvResult>, index: usize) {
        self.last = ctx.prev_result(index).and_then(|r| r.obv);
    }

    fn compute_series(&self, quotes: &[Quote]) -> Vec<ObvResult> {
        let mut last = None;
        quotes
            .iter()
            .enumerate()
            .map(|(i, q)| {
                last = obv_step(quotes, i, last);
                ObvResult {
                    timestamp: q.timestamp,
                    obv: last,
                }
            })
            .collect()
    }

    fn lookback(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::quote;

    #[test]
    fn obv_accumulates_by_direction() {
        let quotes = vec![
            quote(0, 11.0, 9.0, 10.0, 100.0),
            quote(1, 12.0, 10.0, 11.0, 200.0),
            quote(2, 12.0, 10.0, 11.0, 300.0),
            quote(3, 11.0, 9.0, 10.0, 50.0),
        ];
        let obv: Vec<Option<f64>> = calculate_obv(&quotes)
            .unwrap()
            .into_iter()
            .map(|r| r.obv)
            .collect();
        assert_eq!(obv, vec![Some(0.0), Some(200.0), Some(200.0), Some(150.0)]);
    }

    #[test]
    fn obv_empty() {
        assert!(calculate_obv(&[]).unwrap().is_empty());
    }
}
