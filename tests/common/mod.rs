#![allow(dead_code)]

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use quotehub::domain::quote::{Quote, TimeValue};
use quotehub::domain::registry::IndicatorRow;
use std::io::Write;

pub fn ts(offset: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(offset as i64)
}

pub fn make_quote(offset: usize, close: f64) -> Quote {
    Quote {
        timestamp: ts(offset),
        open: close - 0.5,
        high: close + 1.0 + (offset % 3) as f64 * 0.5,
        low: close - 1.0 - (offset % 4) as f64 * 0.25,
        close,
        volume: 1000.0 + ((offset * 37) % 500) as f64,
    }
}

/// Deterministic quotes with swings in both directions.
pub fn wavy_quotes(n: usize) -> Vec<Quote> {
    (0..n)
        .map(|i| make_quote(i, 100.0 + (i as f64 * 0.3).sin() * 10.0 + i as f64 * 0.2))
        .collect()
}

pub fn values(prices: &[f64]) -> Vec<TimeValue> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &value)| TimeValue {
            timestamp: ts(i),
            value,
        })
        .collect()
}

/// Row-by-row comparison tolerant of last-bit differences.
pub fn assert_rows_close(actual: &[IndicatorRow], expected: &[IndicatorRow]) {
    assert_eq!(actual.len(), expected.len(), "row count");
    for (a, e) in actual.iter().zip(expected) {
        assert_eq!(a.timestamp, e.timestamp);
        for (x, y) in a.values.iter().zip(&e.values) {
            match (x, y) {
                (Some(x), Some(y)) => assert_relative_eq!(*x, *y, epsilon = 1e-9),
                (x, y) => assert_eq!(x, y, "at {}", a.timestamp),
            }
        }
    }
}

pub fn quotes_csv(quotes: &[Quote]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for q in quotes {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            q.timestamp.format("%Y-%m-%d"),
            q.open,
            q.high,
            q.low,
            q.close,
            q.volume
        ));
    }
    out
}

pub fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
