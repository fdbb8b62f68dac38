//! Timestamped records: the input quote bar and the record traits every
//! cache entry implements.

use chrono::NaiveDateTime;

/// Anything that occupies one position of a timestamp-ordered series.
pub trait Series {
    fn timestamp(&self) -> NaiveDateTime;
}

/// A record with a single scalar projection, so one hub's output can be
/// another hub's input. Undefined values project to `NaN`.
pub trait Reusable: Series {
    fn value(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quote {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Quote {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

impl Series for Quote {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for Quote {
    fn value(&self) -> f64 {
        self.close
    }
}

/// A bare timestamp/value pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeValue {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Series for TimeValue {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl Reusable for TimeValue {
    fn value(&self) -> f64 {
        self.value
    }
}
