//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{CsvQuoteSource, CsvResultWriter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::aggregator::{QuoteAggregator, aggregate_quotes};
use crate::domain::engine_config::{EngineConfig, build_engine_config, split_indicator_list};
use crate::domain::error::HubError;
use crate::domain::mutation::Mutation;
use crate::domain::provider::{QuoteProvider, StreamProvider};
use crate::domain::quote::Quote;
use crate::domain::registry::{
    DynHub, IndicatorCall, IndicatorRegistry, IndicatorTable, ResolvedCall,
};
use crate::ports::data_port::QuoteSource;
use crate::ports::report_port::ResultSink;

#[derive(Parser, Debug)]
#[command(name = "quotehub", about = "Incremental technical indicators over quote streams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute indicators over a whole quote file
    Compute {
        #[arg(short, long)]
        input: PathBuf,
        /// Indicator call such as "SMA(20)"; repeatable or comma separated
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use buffer-list engines where the formula has one
        #[arg(long)]
        buffered: bool,
        #[command(flatten)]
        aggregate: AggregateArgs,
    },
    /// Feed quotes one at a time, in file order, through subscribed hubs
    Stream {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the comparison against a batch run
        #[arg(long)]
        no_verify: bool,
        #[command(flatten)]
        aggregate: AggregateArgs,
    },
    /// List registered indicators
    List,
}

/// Bar aggregation settings; these override `[engine]` in the config file.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct AggregateArgs {
    /// Roll quotes up into bars of this many minutes (0 turns it off)
    #[arg(long = "aggregate", value_name = "MINUTES")]
    pub minutes: Option<usize>,
    /// Emit flat bars for empty periods
    #[arg(long)]
    pub fill_gaps: bool,
}

impl AggregateArgs {
    fn apply(&self, engine: &mut EngineConfig) -> Result<(), HubError> {
        if let Some(minutes) = self.minutes {
            engine.aggregate_minutes = (minutes > 0).then_some(minutes);
            if engine.aggregate_minutes.is_some() && engine.aggregation().is_none() {
                return Err(HubError::invalid_parameter(
                    "QUOTE-AGG",
                    "period",
                    format!("{minutes} minutes is out of range"),
                ));
            }
        }
        engine.fill_gaps |= self.fill_gaps;
        Ok(())
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let registry = IndicatorRegistry::with_defaults();
    match cli.command {
        Command::Compute {
            input,
            indicators,
            config,
            output,
            buffered,
            aggregate,
        } => finish(run_compute(
            &registry,
            &input,
            &indicators,
            config.as_ref(),
            output.as_ref(),
            buffered,
            aggregate,
        )),
        Command::Stream {
            input,
            indicators,
            config,
            output,
            no_verify,
            aggregate,
        } => match run_stream(
            &registry,
            &input,
            &indicators,
            config.as_ref(),
            output.as_ref(),
            no_verify,
            aggregate,
        ) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(6),
            Err(e) => finish(Err(e)),
        },
        Command::List => {
            run_list(&registry);
            ExitCode::SUCCESS
        }
    }
}

fn finish(result: Result<(), HubError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, HubError> {
    FileConfigAdapter::from_file(path)
}

/// Reads the config file if any; indicators given on the command line
/// replace the configured list.
pub fn load_engine_config(
    registry: &IndicatorRegistry,
    indicators: &[String],
    config_path: Option<&PathBuf>,
) -> Result<EngineConfig, HubError> {
    let mut engine = match config_path {
        Some(path) => build_engine_config(&load_config(path)?, registry)?,
        None => EngineConfig::default(),
    };

    if !indicators.is_empty() {
        engine.indicators = indicators
            .iter()
            .flat_map(|arg| split_indicator_list(arg))
            .map(|item| item.parse::<IndicatorCall>())
            .collect::<Result<Vec<_>, HubError>>()?;
    }
    if engine.indicators.is_empty() {
        return Err(HubError::IndicatorSpec {
            input: String::new(),
            reason: "no indicators requested; pass --indicator or set [indicators] list"
                .to_string(),
        });
    }
    Ok(engine)
}

fn resolve_all<'r>(
    registry: &'r IndicatorRegistry,
    engine: &EngineConfig,
) -> Result<Vec<ResolvedCall<'r>>, HubError> {
    engine
        .indicators
        .iter()
        .map(|call| registry.resolve(call))
        .collect()
}

/// Sorted, de-duplicated quotes, resolved the same way a provider would.
fn normalize(quotes: Vec<Quote>) -> Result<Vec<Quote>, HubError> {
    let mut provider = QuoteProvider::new();
    provider.add_batch(quotes)?;
    let sorted = provider.quotes().to_vec();
    Ok(sorted)
}

fn write_output(tables: &[IndicatorTable], output: Option<&PathBuf>) -> Result<(), HubError> {
    match output {
        Some(path) => {
            CsvResultWriter::create(path)?.write_tables(tables)?;
            eprintln!("Results written to {}", path.display());
        }
        None => CsvResultWriter::new(std::io::stdout().lock()).write_tables(tables)?,
    }
    Ok(())
}

fn run_compute(
    registry: &IndicatorRegistry,
    input: &Path,
    indicators: &[String],
    config_path: Option<&PathBuf>,
    output: Option<&PathBuf>,
    buffered: bool,
    aggregate: AggregateArgs,
) -> Result<(), HubError> {
    let mut engine = load_engine_config(registry, indicators, config_path)?;
    aggregate.apply(&mut engine)?;
    let resolved = resolve_all(registry, &engine)?;

    let mut quotes = normalize(CsvQuoteSource::new(input).load_quotes()?)?;
    eprintln!("Loaded {} quotes from {}", quotes.len(), input.display());
    if let Some(period) = engine.aggregation() {
        quotes = aggregate_quotes(&quotes, period, engine.fill_gaps)?;
        eprintln!(
            "Aggregated into {} bars of {} minutes",
            quotes.len(),
            period.num_minutes()
        );
    }

    let mut tables = Vec::with_capacity(resolved.len());
    for call in &resolved {
        let rows = match buffered.then(|| call.buffered(&quotes, engine.max_list_size)) {
            Some(Some(rows)) => rows?,
            Some(None) => {
                warn!("{} has no buffer engine, computing in batch", call.label());
                call.batch(&quotes)?
            }
            None => call.batch(&quotes)?,
        };
        info!("computed {} ({} rows)", call.label(), rows.len());
        tables.push(call.table(rows));
    }

    write_output(&tables, output)
}

#[derive(Debug, Default)]
struct FeedStats {
    appended: usize,
    inserted: usize,
    updated: usize,
    unchanged: usize,
}

/// Returns `false` when verification found a mismatch.
fn run_stream(
    registry: &IndicatorRegistry,
    input: &Path,
    indicators: &[String],
    config_path: Option<&PathBuf>,
    output: Option<&PathBuf>,
    no_verify: bool,
    aggregate: AggregateArgs,
) -> Result<bool, HubError> {
    let mut engine = load_engine_config(registry, indicators, config_path)?;
    aggregate.apply(&mut engine)?;
    let resolved = resolve_all(registry, &engine)?;

    let mut provider: QuoteProvider = match engine.max_cache_size {
        Some(max) => QuoteProvider::with_max_cache_size(max)?,
        None => QuoteProvider::new(),
    };
    let aggregator = engine
        .aggregation()
        .map(|period| QuoteAggregator::new(&provider, period, engine.fill_gaps))
        .transpose()?;
    let source: &dyn StreamProvider<Quote> = match &aggregator {
        Some(aggregator) => aggregator,
        None => &provider,
    };
    let hubs = resolved
        .iter()
        .map(|call| call.stream(source))
        .collect::<Result<Vec<Box<dyn DynHub>>, HubError>>()?;

    let quotes = CsvQuoteSource::new(input).load_quotes()?;
    eprintln!(
        "Streaming {} quotes through {} hubs",
        quotes.len(),
        hubs.len()
    );

    let mut stats = FeedStats::default();
    for quote in quotes {
        match provider.add(quote)? {
            Some(Mutation::Append { .. }) => stats.appended += 1,
            Some(Mutation::Insert { .. }) => stats.inserted += 1,
            Some(_) => stats.updated += 1,
            None => stats.unchanged += 1,
        }
    }
    eprintln!(
        "Fed quotes: {} appended, {} inserted, {} updated, {} unchanged",
        stats.appended, stats.inserted, stats.updated, stats.unchanged
    );

    for hub in &hubs {
        hub.finalize()?;
        if hub.is_faulted() {
            warn!("{} is faulted after finalize", hub.name());
        }
    }

    let mut verified = true;
    if engine.verify && !no_verify {
        if provider.max_cache_size().is_some() {
            warn!("provider is bounded; skipping verification against batch");
            eprintln!("Verification skipped: bounded provider keeps only recent quotes");
        } else {
            let reference = match engine.aggregation() {
                Some(period) => aggregate_quotes(&provider.quotes(), period, engine.fill_gaps)?,
                None => provider.quotes().to_vec(),
            };
            verified = verify(&resolved, &hubs, &reference)?;
        }
    }

    let tables: Vec<IndicatorTable> = resolved
        .iter()
        .zip(&hubs)
        .map(|(call, hub)| call.table(hub.rows()))
        .collect();
    write_output(&tables, output)?;
    Ok(verified)
}

fn verify(
    resolved: &[ResolvedCall<'_>],
    hubs: &[Box<dyn DynHub>],
    quotes: &[Quote],
) -> Result<bool, HubError> {
    let mut verified = true;
    for (call, hub) in resolved.iter().zip(hubs) {
        let batch = call.batch(quotes)?;
        let streamed = hub.rows();
        let mismatches = batch
            .iter()
            .zip(&streamed)
            .filter(|(b, s)| b != s)
            .count()
            + batch.len().abs_diff(streamed.len());
        if mismatches == 0 {
            eprintln!("  {}: stream matches batch ({} rows)", call.label(), batch.len());
        } else {
            eprintln!("  {}: {} rows differ from batch", call.label(), mismatches);
            verified = false;
        }
    }
    Ok(verified)
}

fn run_list(registry: &IndicatorRegistry) {
    println!("{:<8} {:<28} {:<36} COLUMNS", "ID", "PARAMS", "NAME");
    for spec in registry.iter() {
        let params = spec
            .params
            .iter()
            .map(|p| match p.choices.get(p.default as usize) {
                Some(choice) => format!("{}={}", p.name, choice),
                None => format!("{}={}", p.name, p.default),
            })
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<8} {:<28} {:<36} {}",
            spec.id,
            if params.is_empty() { "-" } else { params.as_str() },
            spec.name,
            spec.columns.join(",")
        );
    }
}
