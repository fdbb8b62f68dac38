//! Indicator formulas.
//!
//! Every formula comes as a pure batch function (`calculate_*`), a hub
//! formula implementing [`Indicator`](crate::domain::hub::Indicator) and,
//! for most, a buffer-list engine. Result records store undefined
//! positions as `None`.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod fractal;
pub mod macd;
pub mod obv;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stddev;

use crate::domain::quote::Series;

pub use atr::{Atr, AtrBuffer, AtrResult, calculate_atr};
pub use bollinger::{Bollinger, BollingerBuffer, BollingerResult, calculate_bollinger};
pub use ema::{Ema, EmaBuffer, EmaResult, calculate_ema};
pub use fractal::{EndType, Fractal, FractalResult, calculate_fractal};
pub use macd::{Macd, MacdBuffer, MacdResult, calculate_macd};
pub use obv::{Obv, ObvResult, calculate_obv};
pub use roc::{Roc, RocResult, calculate_roc};
pub use rsi::{Rsi, RsiBuffer, RsiResult, calculate_rsi};
pub use sma::{Sma, SmaBuffer, SmaResult, calculate_sma};
pub use stddev::{StdDev, StdDevResult, calculate_stddev};

/// Flat, named view of a result record for tabular output.
pub trait ResultColumns: Series {
    const COLUMNS: &'static [&'static str];

    /// One value per entry of `COLUMNS`, in order.
    fn row(&self) -> Vec<Option<f64>>;
}
