//! Williams Fractal.
//!
//! A bearish fractal marks a high strictly above the `left_span` highs
//! before it and the `right_span` highs after it; a bullish fractal marks a
//! low strictly below the lows on the same wings. Positions without a full
//! wing on either side are undefined. Because the value at `i` depends on
//! later records, streamed results are provisional until [`Hub::finalize`]
//! runs.
//!
//! [`Hub::finalize`]: crate::domain::hub::Hub::finalize

use std::fmt;

use chrono::NaiveDateTime;

use crate::domain::error::HubError;
use crate::domain::hub::{Context, Indicator};
use crate::domain::indicator::ResultColumns;
use crate::domain::indicator_helpers::validate_period;
use crate::domain::quote::{Quote, Series};

/// Which prices form the wings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndType {
    Close,
    #[default]
    HighLow,
}

impl EndType {
    fn high(self, quote: &Quote) -> f64 {
        match self {
            EndType::Close => quote.close,
            EndType::HighLow => quote.high,
        }
    }

    fn low(self, quote: &Quote) -> f64 {
        match self {
            EndType::Close => quote.close,
            EndType::HighLow => quote.low,
        }
    }
}

impl fmt::Display for EndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndType::Close => write!(f, "CLOSE"),
            EndType::HighLow => write!(f, "HIGHLOW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FractalResult {
    pub timestamp: NaiveDateTime,
    pub fractal_bear: Option<f64>,
    pub fractal_bull: Option<f64>,
}

impl Series for FractalResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl ResultColumns for FractalResult {
    const COLUMNS: &'static [&'static str] = &["fractal_bear", "fractal_bull"];

    fn row(&self) -> Vec<Option<f64>> {
        vec![self.fractal_bear, self.fractal_bull]
    }
}

pub fn calculate_fractal(
    quotes: &[Quote],
    left_span: usize,
    right_span: usize,
    end_type: EndType,
) -> Result<Vec<FractalResult>, HubError> {
    Ok(Fractal::with_spans(left_span, right_span, end_type)?.compute_series(quotes))
}

/// Hub formula. Stateless and non-causal.
#[derive(Debug, Clone)]
pub struct Fractal {
    left_span: usize,
    right_span: usize,
    end_type: EndType,
}

impl Fractal {
    /// Equal wings of `span` on both sides.
    pub fn new(span: usize, end_type: EndType) -> Result<Self, HubError> {
        Self::with_spans(span, span, end_type)
    }

    pub fn with_spans(
        left_span: usize,
        right_span: usize,
        end_type: EndType,
    ) -> Result<Self, HubError> {
        validate_period("FRACTAL", "left_span", left_span, 2)?;
        validate_period("FRACTAL", "right_span", right_span, 2)?;
        Ok(Self {
            left_span,
            right_span,
            end_type,
        })
    }

    fn at(&self, quotes: &[Quote], i: usize) -> FractalResult {
        let timestamp = quotes[i].timestamp;
        let mut result = FractalResult {
            timestamp,
            fractal_bear: None,
            fractal_bull: None,
        };
        if i < self.left_span || i + self.right_span >= quotes.len() {
            return result;
        }

        let high = self.end_type.high(&quotes[i]);
        let low = self.end_type.low(&quotes[i]);
        let wings = (i - self.left_span..=i + self.right_span).filter(|&p| p != i);
        let (mut is_high, mut is_low) = (true, true);
        for p in wings {
            if high <= self.end_type.high(&quotes[p]) {
                is_high = false;
            }
            if low >= self.end_type.low(&quotes[p]) {
                is_low = false;
            }
        }
        if is_high {
            result.fractal_bear = Some(high);
        }
        if is_low {
            result.fractal_bull = Some(low);
        }
        result
    }
}

impl fmt::Display for Fractal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FRACTAL({},{},{})",
            self.left_span, self.right_span, self.end_type
        )
    }
}

impl Indicator for Fractal {
    type Input = Quote;
    type Output = FractalResult;

    fn to_indicator(
        &mut self,
        ctx: &Context<'_, Quote, FractalResult>,
        item: &Quote,
        index_hint: Option<usize>,
    ) -> Result<(FractalResult, usize), HubError> {
        let i = ctx.resolve(item, index_hint)?;
        Ok((self.at(ctx.inputs(), i), i))
    }

    fn rollback_state(&mut self, _ctx: &Context<'_, Quote, FractalResult>, _index: usize) {}

    fn compute_series(&self, quotes: &[Quote]) -> Vec<FractalResult> {
        (0..quotes.len()).map(|i| self.at(quotes, i)).collect()
    }

    fn lookback(&self) -> usize {
        self.left_span
    }

    fn lookahead(&self) -> usize {
        self.right_span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::quote;

    fn bars(highs: &[f64]) -> Vec<Quote> {
        highs
            .iter()
            .enumerate()
            .map(|(i, &h)| quote(i, h, h - 10.0, h - 5.0, 1000.0))
            .collect()
    }

    #[test]
    fn detects_peak_and_trough() {
        let quotes = bars(&[10.0, 12.0, 15.0, 11.0, 9.0, 6.0, 8.0, 13.0]);
        let series = calculate_fractal(&quotes, 2, 2, EndType::HighLow).unwrap();
        assert_eq!(series[2].fractal_bear, Some(15.0));
        assert_eq!(series[2].fractal_bull, None);
        assert_eq!(series[5].fractal_bull, Some(-4.0));
        assert!(series[..2].iter().all(|r| r.fractal_bear.is_none()));
        assert!(series[6..].iter().all(|r| r.fractal_bull.is_none()));
    }

    #[test]
    fn equal_wings_are_not_fractals() {
        let quotes = bars(&[10.0, 12.0, 15.0, 15.0, 9.0, 6.0]);
        let series = calculate_fractal(&quotes, 2, 2, EndType::HighLow).unwrap();
        assert_eq!(series[2].fractal_bear, None);
        assert_eq!(series[3].fractal_bear, None);
    }

    #[test]
    fn close_end_type_uses_close() {
        let quotes = bars(&[10.0, 12.0, 15.0, 11.0, 9.0]);
        let series = calculate_fractal(&quotes, 2, 2, EndType::Close).unwrap();
        assert_eq!(series[2].fractal_bear, Some(10.0));
    }

    #[test]
    fn uneven_wings() {
        // the peak at 2 has two bars on its left and three on its right
        let quotes = bars(&[10.0, 12.0, 15.0, 11.0, 9.0, 14.0, 8.0]);
        let series = calculate_fractal(&quotes, 2, 3, EndType::HighLow).unwrap();
        assert_eq!(series[2].fractal_bear, Some(15.0));
        // the last three positions lack a full right wing
        assert!(series[4..].iter().all(|r| r.fractal_bear.is_none()));

        // a longer right wing reaches the 16 high and cancels the peak
        let quotes = bars(&[10.0, 12.0, 15.0, 11.0, 9.0, 16.0, 8.0]);
        let series = calculate_fractal(&quotes, 2, 3, EndType::HighLow).unwrap();
        assert_eq!(series[2].fractal_bear, None);
        let series = calculate_fractal(&quotes, 2, 2, EndType::HighLow).unwrap();
        assert_eq!(series[2].fractal_bear, Some(15.0));
    }

    #[test]
    fn lookback_and_lookahead_follow_wings() {
        let fractal = Fractal::with_spans(3, 5, EndType::Close).unwrap();
        assert_eq!(fractal.lookback(), 3);
        assert_eq!(fractal.lookahead(), 5);
    }

    #[test]
    fn span_below_two_rejected() {
        assert!(Fractal::new(1, EndType::HighLow).is_err());
        assert!(Fractal::with_spans(2, 1, EndType::HighLow).is_err());
        assert!(Fractal::with_spans(1, 4, EndType::HighLow).is_err());
    }

    #[test]
    fn display_name() {
        assert_eq!(
            Fractal::new(2, EndType::HighLow).unwrap().to_string(),
            "FRACTAL(2,2,HIGHLOW)"
        );
        assert_eq!(
            Fractal::with_spans(2, 4, EndType::Close).unwrap().to_string(),
            "FRACTAL(2,4,CLOSE)"
        );
    }
}
