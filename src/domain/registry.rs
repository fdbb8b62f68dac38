//! Indicator registry for dynamic invocation.
//!
//! Built explicitly (usually with [`IndicatorRegistry::with_defaults`]) and
//! passed to whatever needs to turn an `ID(p1,p2)` string into a batch
//! computation or a subscribed hub.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::domain::buffer::{BufferIndicator, BufferList};
use crate::domain::error::HubError;
use crate::domain::hub::{Hub, Indicator};
use crate::domain::indicator::{
    Atr, AtrBuffer, Bollinger, BollingerBuffer, EndType, Ema, EmaBuffer, Fractal, Macd,
    MacdBuffer, Obv, ResultColumns, Roc, Rsi, RsiBuffer, Sma, SmaBuffer, StdDev,
    calculate_atr, calculate_bollinger, calculate_ema, calculate_fractal, calculate_macd,
    calculate_obv, calculate_roc, calculate_rsi, calculate_sma, calculate_stddev,
};
use crate::domain::provider::StreamProvider;
use crate::domain::quote::{Quote, Series};

/// One row of a result table, values ordered as [`IndicatorSpec::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// Rows produced by one indicator call, labelled for output.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorTable {
    /// Canonical call string such as `SMA(20)`.
    pub label: String,
    pub columns: &'static [&'static str],
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorTable {
    /// `label.column` for every column.
    pub fn headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("{}.{c}", self.label))
            .collect()
    }
}

pub fn to_rows<R: ResultColumns>(results: &[R]) -> Vec<IndicatorRow> {
    results
        .iter()
        .map(|r| IndicatorRow {
            timestamp: r.timestamp(),
            values: r.row(),
        })
        .collect()
}

/// Object-safe view of a subscribed hub.
pub trait DynHub {
    fn name(&self) -> String;
    fn rows(&self) -> Vec<IndicatorRow>;
    fn finalize(&self) -> Result<(), HubError>;
    fn len(&self) -> usize;
    fn is_faulted(&self) -> bool;
}

impl<F> DynHub for Hub<F>
where
    F: Indicator,
    F::Output: ResultColumns,
{
    fn name(&self) -> String {
        Hub::name(self)
    }

    fn rows(&self) -> Vec<IndicatorRow> {
        to_rows(&self.results())
    }

    fn finalize(&self) -> Result<(), HubError> {
        Hub::finalize(self)
    }

    fn len(&self) -> usize {
        Hub::len(self)
    }

    fn is_faulted(&self) -> bool {
        Hub::is_faulted(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
    /// Keywords accepted in place of a number; a keyword maps to its index.
    pub choices: &'static [&'static str],
    /// When omitted, take the value of the parameter at this position
    /// instead of `default`.
    pub same_as: Option<usize>,
}

impl ParamSpec {
    const fn period(name: &'static str, default: f64, min: f64) -> Self {
        Self {
            name,
            default,
            min,
            max: 10_000.0,
            integer: true,
            choices: &[],
            same_as: None,
        }
    }

    fn parse(&self, id: &str, text: &str) -> Result<f64, HubError> {
        let value = match self
            .choices
            .iter()
            .position(|c| c.eq_ignore_ascii_case(text))
        {
            Some(index) => index as f64,
            None => text.parse::<f64>().map_err(|_| HubError::IndicatorSpec {
                input: text.to_string(),
                reason: format!("{id} parameter {} is not a number", self.name),
            })?,
        };
        self.check(id, value)?;
        Ok(value)
    }

    fn check(&self, id: &str, value: f64) -> Result<(), HubError> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(HubError::invalid_parameter(
                id,
                self.name,
                format!("must be between {} and {}, got {value}", self.min, self.max),
            ));
        }
        if self.integer && value.fract() != 0.0 {
            return Err(HubError::invalid_parameter(
                id,
                self.name,
                format!("must be a whole number, got {value}"),
            ));
        }
        Ok(())
    }

    fn display(&self, value: f64) -> String {
        match self.choices.get(value as usize) {
            Some(choice) => choice.to_string(),
            None => value.to_string(),
        }
    }
}

pub type BatchFn = fn(&[Quote], &[f64]) -> Result<Vec<IndicatorRow>, HubError>;
pub type StreamFn = fn(&dyn StreamProvider<Quote>, &[f64]) -> Result<Box<dyn DynHub>, HubError>;
pub type BufferFn = fn(&[Quote], &[f64], Option<usize>) -> Result<Vec<IndicatorRow>, HubError>;

/// Metadata and entry points for one formula.
#[derive(Clone)]
pub struct IndicatorSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    pub columns: &'static [&'static str],
    pub batch: BatchFn,
    pub stream: StreamFn,
    /// Present for formulas with a buffer-list engine.
    pub buffer: Option<BufferFn>,
}

impl fmt::Debug for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorSpec")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("columns", &self.columns)
            .field("buffer", &self.buffer.is_some())
            .finish()
    }
}

/// A parsed `ID(p1,p2,...)` string. Parameters stay as text until
/// resolved against a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorCall {
    pub id: String,
    pub args: Vec<String>,
}

impl FromStr for IndicatorCall {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let spec_error = |reason: &str| HubError::IndicatorSpec {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (id, args) = match input.find('(') {
            None => (input, Vec::new()),
            Some(open) => {
                let inner = input[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| spec_error("missing closing parenthesis"))?;
                if inner.contains(['(', ')']) {
                    return Err(spec_error("nested parentheses"));
                }
                let args = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| a.trim().to_string()).collect()
                };
                (input[..open].trim(), args)
            }
        };

        if id.is_empty() {
            return Err(spec_error("missing indicator id"));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(spec_error("indicator id must be alphanumeric"));
        }
        if args.iter().any(|a| a.is_empty()) {
            return Err(spec_error("empty parameter"));
        }
        Ok(Self {
            id: id.to_ascii_uppercase(),
            args,
        })
    }
}

impl fmt::Display for IndicatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}({})", self.id, self.args.join(","))
        }
    }
}

/// A call checked against its spec, with every parameter filled in.
#[derive(Debug, Clone)]
pub struct ResolvedCall<'r> {
    pub spec: &'r IndicatorSpec,
    pub params: Vec<f64>,
}

impl ResolvedCall<'_> {
    /// Canonical call string, e.g. `MACD(12,26,9)`.
    pub fn label(&self) -> String {
        let call = IndicatorCall {
            id: self.spec.id.to_string(),
            args: self
                .spec
                .params
                .iter()
                .zip(&self.params)
                .map(|(p, v)| p.display(*v))
                .collect(),
        };
        call.to_string()
    }

    pub fn batch(&self, quotes: &[Quote]) -> Result<Vec<IndicatorRow>, HubError> {
        (self.spec.batch)(quotes, &self.params)
    }

    /// Wraps `rows` with this call's label and columns.
    pub fn table(&self, rows: Vec<IndicatorRow>) -> IndicatorTable {
        IndicatorTable {
            label: self.label(),
            columns: self.spec.columns,
            rows,
        }
    }

    /// Subscribes a hub to `provider`: a quote provider or an aggregator.
    pub fn stream(
        &self,
        provider: &dyn StreamProvider<Quote>,
    ) -> Result<Box<dyn DynHub>, HubError> {
        (self.spec.stream)(provider, &self.params)
    }

    /// Runs the buffer-list engine, keeping at most `max_list_size` rows.
    /// `None` when the formula has no buffer engine.
    pub fn buffered(
        &self,
        quotes: &[Quote],
        max_list_size: Option<usize>,
    ) -> Option<Result<Vec<IndicatorRow>, HubError>> {
        self.spec
            .buffer
            .map(|buffer| buffer(quotes, &self.params, max_list_size))
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorRegistry {
    specs: Vec<IndicatorSpec>,
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in formula.
    pub fn with_defaults() -> Self {
        Self {
            specs: builtin_specs(),
        }
    }

    pub fn register(&mut self, spec: IndicatorSpec) -> Result<(), HubError> {
        if self.get(spec.id).is_some() {
            return Err(HubError::invalid_parameter(
                spec.id,
                "id",
                "is already registered",
            ));
        }
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&IndicatorSpec> {
        self.specs.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Checks `call` against its spec; missing trailing parameters take
    /// their defaults.
    pub fn resolve(&self, call: &IndicatorCall) -> Result<ResolvedCall<'_>, HubError> {
        let spec = self.get(&call.id).ok_or_else(|| HubError::UnknownIndicator {
            id: call.id.clone(),
        })?;
        if call.args.len() > spec.params.len() {
            return Err(HubError::IndicatorSpec {
                input: call.to_string(),
                reason: format!(
                    "{} takes at most {} parameters",
                    spec.id,
                    spec.params.len()
                ),
            });
        }

        let mut params = Vec::with_capacity(spec.params.len());
        for (i, p) in spec.params.iter().enumerate() {
            let value = match call.args.get(i) {
                Some(text) => p.parse(spec.id, text)?,
                None => p
                    .same_as
                    .and_then(|j| params.get(j).copied())
                    .unwrap_or(p.default),
            };
            params.push(value);
        }
        Ok(ResolvedCall { spec, params })
    }

    /// Parses and resolves in one step.
    pub fn resolve_str(&self, input: &str) -> Result<ResolvedCall<'_>, HubError> {
        self.resolve(&input.parse()?)
    }
}

fn whole(params: &[f64], i: usize) -> usize {
    params.get(i).map_or(0, |v| *v as usize)
}

fn real(params: &[f64], i: usize) -> f64 {
    params.get(i).copied().unwrap_or(f64::NAN)
}

fn end_type(params: &[f64], i: usize) -> EndType {
    if whole(params, i) == 1 {
        EndType::Close
    } else {
        EndType::HighLow
    }
}

fn subscribe<F>(
    provider: &dyn StreamProvider<Quote>,
    formula: F,
) -> Result<Box<dyn DynHub>, HubError>
where
    F: Indicator<Input = Quote>,
    F::Output: ResultColumns,
{
    Ok(Box::new(Hub::new(provider, formula)?))
}

fn buffered<B>(
    engine: B,
    quotes: &[Quote],
    max_list_size: Option<usize>,
) -> Result<Vec<IndicatorRow>, HubError>
where
    B: BufferIndicator<Input = Quote>,
    B::Output: ResultColumns,
{
    let mut list = BufferList::new(engine);
    list.set_max_list_size(max_list_size)?;
    list.add_batch(quotes.iter().cloned());
    Ok(to_rows(&list.to_vec()))
}

const PERIOD_SMA: [ParamSpec; 1] = [ParamSpec::period("period", 20.0, 1.0)];
const PERIOD_EMA: [ParamSpec; 1] = [ParamSpec::period("period", 20.0, 1.0)];
const PERIOD_RSI: [ParamSpec; 1] = [ParamSpec::period("period", 14.0, 1.0)];
const PERIOD_STDDEV: [ParamSpec; 1] = [ParamSpec::period("period", 14.0, 2.0)];
const PERIOD_ATR: [ParamSpec; 1] = [ParamSpec::period("period", 14.0, 1.0)];
const PERIOD_ROC: [ParamSpec; 1] = [ParamSpec::period("period", 10.0, 1.0)];
const MACD_PARAMS: [ParamSpec; 3] = [
    ParamSpec::period("fast", 12.0, 1.0),
    ParamSpec::period("slow", 26.0, 2.0),
    ParamSpec::period("signal", 9.0, 1.0),
];
const BB_PARAMS: [ParamSpec; 2] = [
    ParamSpec::period("period", 20.0, 2.0),
    ParamSpec {
        name: "multiplier",
        default: 2.0,
        min: 0.01,
        max: 100.0,
        integer: false,
        choices: &[],
        same_as: None,
    },
];
const FRACTAL_PARAMS: [ParamSpec; 3] = [
    ParamSpec::period("left_span", 2.0, 2.0),
    ParamSpec {
        same_as: Some(0),
        ..ParamSpec::period("right_span", 2.0, 2.0)
    },
    ParamSpec {
        name: "end_type",
        default: 0.0,
        min: 0.0,
        max: 1.0,
        integer: true,
        choices: &["HIGHLOW", "CLOSE"],
        same_as: None,
    },
];

fn builtin_specs() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec {
            id: "SMA",
            name: "Simple Moving Average",
            params: &PERIOD_SMA,
            columns: &["sma"],
            batch: |q, p| Ok(to_rows(&calculate_sma(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, Sma::new(whole(p, 0))?),
            buffer: Some(|q, p, m| buffered(SmaBuffer::new(whole(p, 0))?, q, m)),
        },
        IndicatorSpec {
            id: "EMA",
            name: "Exponential Moving Average",
            params: &PERIOD_EMA,
            columns: &["ema"],
            batch: |q, p| Ok(to_rows(&calculate_ema(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, Ema::new(whole(p, 0))?),
            buffer: Some(|q, p, m| buffered(EmaBuffer::new(whole(p, 0))?, q, m)),
        },
        IndicatorSpec {
            id: "RSI",
            name: "Relative Strength Index",
            params: &PERIOD_RSI,
            columns: &["rsi"],
            batch: |q, p| Ok(to_rows(&calculate_rsi(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, Rsi::new(whole(p, 0))?),
            buffer: Some(|q, p, m| buffered(RsiBuffer::new(whole(p, 0))?, q, m)),
        },
        IndicatorSpec {
            id: "MACD",
            name: "Moving Average Convergence/Divergence",
            params: &MACD_PARAMS,
            columns: &["macd", "signal", "histogram", "fast_ema", "slow_ema"],
            batch: |q, p| {
                Ok(to_rows(&calculate_macd(
                    q,
                    whole(p, 0),
                    whole(p, 1),
                    whole(p, 2),
                )?))
            },
            stream: |s, p| subscribe(s, Macd::new(whole(p, 0), whole(p, 1), whole(p, 2))?),
            buffer: Some(|q, p, m| {
                buffered(MacdBuffer::new(whole(p, 0), whole(p, 1), whole(p, 2))?, q, m)
            }),
        },
        IndicatorSpec {
            id: "STDDEV",
            name: "Standard Deviation",
            params: &PERIOD_STDDEV,
            columns: &["std_dev", "mean", "z_score"],
            batch: |q, p| Ok(to_rows(&calculate_stddev(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, StdDev::new(whole(p, 0))?),
            buffer: None,
        },
        IndicatorSpec {
            id: "BB",
            name: "Bollinger Bands",
            params: &BB_PARAMS,
            columns: &["sma", "upper_band", "lower_band", "percent_b", "z_score", "width"],
            batch: |q, p| Ok(to_rows(&calculate_bollinger(q, whole(p, 0), real(p, 1))?)),
            stream: |s, p| subscribe(s, Bollinger::new(whole(p, 0), real(p, 1))?),
            buffer: Some(|q, p, m| {
                buffered(BollingerBuffer::new(whole(p, 0), real(p, 1))?, q, m)
            }),
        },
        IndicatorSpec {
            id: "ATR",
            name: "Average True Range",
            params: &PERIOD_ATR,
            columns: &["tr", "atr", "atrp"],
            batch: |q, p| Ok(to_rows(&calculate_atr(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, Atr::new(whole(p, 0))?),
            buffer: Some(|q, p, m| buffered(AtrBuffer::new(whole(p, 0))?, q, m)),
        },
        IndicatorSpec {
            id: "ROC",
            name: "Rate of Change",
            params: &PERIOD_ROC,
            columns: &["momentum", "roc"],
            batch: |q, p| Ok(to_rows(&calculate_roc(q, whole(p, 0))?)),
            stream: |s, p| subscribe(s, Roc::new(whole(p, 0))?),
            buffer: None,
        },
        IndicatorSpec {
            id: "OBV",
            name: "On-Balance Volume",
            params: &[],
            columns: &["obv"],
            batch: |q, _| Ok(to_rows(&calculate_obv(q)?)),
            stream: |s, _| subscribe(s, Obv::new()),
            buffer: None,
        },
        IndicatorSpec {
            id: "FRACTAL",
            name: "Williams Fractal",
            params: &FRACTAL_PARAMS,
            columns: &["fractal_bear", "fractal_bull"],
            batch: |q, p| {
                let series = calculate_fractal(q, whole(p, 0), whole(p, 1), end_type(p, 2))?;
                Ok(to_rows(&series))
            },
            stream: |s, p| {
                subscribe(
                    s,
                    Fractal::with_spans(whole(p, 0), whole(p, 1), end_type(p, 2))?,
                )
            },
            buffer: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::quotes;
    use crate::domain::indicator::{MacdResult, SmaResult};
    use crate::domain::provider::QuoteProvider;

    #[test]
    fn call_parses_and_prints() {
        let call: IndicatorCall = " macd( 12, 26 ,9 ) ".parse().unwrap();
        assert_eq!(call.id, "MACD");
        assert_eq!(call.args, vec!["12", "26", "9"]);
        assert_eq!(call.to_string(), "MACD(12,26,9)");

        let bare: IndicatorCall = "OBV".parse().unwrap();
        assert!(bare.args.is_empty());
        assert_eq!("OBV()".parse::<IndicatorCall>().unwrap(), bare);
    }

    #[test]
    fn malformed_calls_rejected() {
        for input in ["", "SMA(20", "(20)", "SMA(20,)", "S-MA(2)", "SMA((2))"] {
            assert!(
                matches!(input.parse::<IndicatorCall>(), Err(HubError::IndicatorSpec { .. })),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn resolve_fills_defaults() {
        let registry = IndicatorRegistry::with_defaults();
        let resolved = registry.resolve_str("MACD(5)").unwrap();
        assert_eq!(resolved.params, vec![5.0, 26.0, 9.0]);
        assert_eq!(resolved.label(), "MACD(5,26,9)");
        assert_eq!(registry.resolve_str("bb").unwrap().label(), "BB(20,2)");
    }

    #[test]
    fn table_headers_are_prefixed() {
        let registry = IndicatorRegistry::with_defaults();
        let resolved = registry.resolve_str("ROC(5)").unwrap();
        let table = resolved.table(Vec::new());
        assert_eq!(table.headers(), vec!["ROC(5).momentum", "ROC(5).roc"]);
    }

    #[test]
    fn resolve_accepts_keyword_choices() {
        let registry = IndicatorRegistry::with_defaults();
        let resolved = registry.resolve_str("FRACTAL(3,4,close)").unwrap();
        assert_eq!(resolved.params, vec![3.0, 4.0, 1.0]);
        assert_eq!(resolved.label(), "FRACTAL(3,4,CLOSE)");
    }

    #[test]
    fn omitted_right_span_mirrors_left() {
        let registry = IndicatorRegistry::with_defaults();
        let resolved = registry.resolve_str("FRACTAL(5)").unwrap();
        assert_eq!(resolved.params, vec![5.0, 5.0, 0.0]);
        assert_eq!(resolved.label(), "FRACTAL(5,5,HIGHLOW)");
        assert_eq!(
            registry.resolve_str("FRACTAL").unwrap().label(),
            "FRACTAL(2,2,HIGHLOW)"
        );
    }

    #[test]
    fn resolve_rejects_bad_parameters() {
        let registry = IndicatorRegistry::with_defaults();
        assert!(matches!(
            registry.resolve_str("SMA(0)"),
            Err(HubError::InvalidParameter { .. })
        ));
        assert!(matches!(
            registry.resolve_str("SMA(2.5)"),
            Err(HubError::InvalidParameter { .. })
        ));
        assert!(matches!(
            registry.resolve_str("SMA(abc)"),
            Err(HubError::IndicatorSpec { .. })
        ));
        assert!(matches!(
            registry.resolve_str("SMA(5,6)"),
            Err(HubError::IndicatorSpec { .. })
        ));
        assert!(matches!(
            registry.resolve_str("NOPE(1)"),
            Err(HubError::UnknownIndicator { .. })
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = IndicatorRegistry::new();
        let spec = IndicatorRegistry::with_defaults().get("sma").unwrap().clone();
        registry.register(spec.clone()).unwrap();
        assert!(registry.register(spec).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn columns_match_result_columns() {
        let registry = IndicatorRegistry::with_defaults();
        assert_eq!(registry.get("SMA").unwrap().columns, SmaResult::COLUMNS);
        assert_eq!(registry.get("MACD").unwrap().columns, MacdResult::COLUMNS);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn batch_and_stream_dispatch_agree() {
        let registry = IndicatorRegistry::with_defaults();
        let bars = quotes(60);
        let mut provider: QuoteProvider = QuoteProvider::new();
        provider.add_batch(bars.clone()).unwrap();

        for spec in registry.iter() {
            let resolved = registry.resolve_str(spec.id).unwrap();
            let batch = resolved.batch(&bars).unwrap();
            let hub = resolved.stream(&provider).unwrap();
            assert_eq!(hub.rows(), batch, "{}", resolved.label());
            assert_eq!(batch[0].values.len(), spec.columns.len());
        }
    }

    #[test]
    fn buffered_dispatch_keeps_tail() {
        let registry = IndicatorRegistry::with_defaults();
        let bars = quotes(40);
        let resolved = registry.resolve_str("SMA(5)").unwrap();
        let full = resolved.buffered(&bars, None).unwrap().unwrap();
        let tail = resolved.buffered(&bars, Some(10)).unwrap().unwrap();
        assert_eq!(full.len(), 40);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0].timestamp, full[30].timestamp);
        assert!(registry.resolve_str("OBV").unwrap().buffered(&bars, None).is_none());
    }
}
