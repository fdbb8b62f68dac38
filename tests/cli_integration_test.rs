//! CLI integration tests for the compute, stream and list commands.
//!
//! Tests cover:
//! - compute over a quote file, with and without buffer engines
//! - stream over unordered files with duplicate timestamps
//! - --aggregate bars in both commands
//! - [engine]/[indicators] config files and command-line overrides
//! - Exit codes for bad input, bad config and bad indicator calls

mod common;

use clap::Parser;
use common::*;
use quotehub::cli::{self, Cli};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn run(args: &[&str]) -> ExitCode {
    let mut full = vec!["quotehub"];
    full.extend_from_slice(args);
    cli::run(Cli::try_parse_from(full).unwrap())
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn read_output(path: &Path) -> Vec<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .unwrap();
    rdr.records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

struct Workspace {
    dir: tempfile::TempDir,
    input: tempfile::NamedTempFile,
}

impl Workspace {
    fn new(csv: &str) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            input: write_temp(csv),
        }
    }

    fn input(&self) -> &str {
        path_str(self.input.path())
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

mod compute {
    use super::*;

    #[test]
    fn writes_joined_table() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(30)));
        let out = ws.output("out.csv");
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--indicator",
            "SMA(5)",
            "--indicator",
            "MACD(3,6,2),OBV",
            "--output",
            path_str(&out),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);

        let rows = read_output(&out);
        assert_eq!(
            rows[0],
            vec![
                "timestamp",
                "SMA(5).sma",
                "MACD(3,6,2).macd",
                "MACD(3,6,2).signal",
                "MACD(3,6,2).histogram",
                "MACD(3,6,2).fast_ema",
                "MACD(3,6,2).slow_ema",
                "OBV.obv",
            ]
        );
        assert_eq!(rows.len(), 31);
        assert_eq!(rows[1][0], "2024-01-01");
        // warm-up cells are empty
        assert_eq!(rows[1][1], "");
        assert!(!rows[5][1].is_empty());
    }

    #[test]
    fn buffered_matches_batch_shape() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(40)));
        let batch_out = ws.output("batch.csv");
        let buffered_out = ws.output("buffered.csv");
        for (out, extra) in [(&batch_out, None), (&buffered_out, Some("--buffered"))] {
            let mut args = vec![
                "compute",
                "--input",
                ws.input(),
                "--indicator",
                "EMA(4),ROC(2)",
                "--output",
                path_str(out),
            ];
            args.extend(extra);
            assert_eq!(run(&args), ExitCode::SUCCESS);
        }

        let batch = read_output(&batch_out);
        let buffered = read_output(&buffered_out);
        assert_eq!(batch.len(), buffered.len());
        assert_eq!(batch[0], buffered[0]);
        // ROC has no buffer engine and falls back to batch
        for (b, s) in batch.iter().zip(&buffered).skip(1) {
            assert_eq!(b[0], s[0]);
            assert_eq!(b[2..], s[2..]);
        }
    }

    #[test]
    fn indicators_from_config_file() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(25)));
        let config = write_temp("[indicators]\nlist = RSI(5), BB(6,2)\n");
        let out = ws.output("out.csv");
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--config",
            path_str(config.path()),
            "--output",
            path_str(&out),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);
        let header = &read_output(&out)[0];
        assert_eq!(header[1], "RSI(5).rsi");
        assert!(header.iter().any(|h| h.starts_with("BB(6,2).")));
    }

    #[test]
    fn command_line_replaces_config_list() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(10)));
        let config = write_temp("[indicators]\nlist = RSI(5)\n");
        let out = ws.output("out.csv");
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--config",
            path_str(config.path()),
            "--indicator",
            "ATR(3)",
            "--output",
            path_str(&out),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);
        let header = &read_output(&out)[0];
        assert_eq!(header[1..], ["ATR(3).tr", "ATR(3).atr", "ATR(3).atrp"]);
    }
}

mod stream {
    use super::*;

    fn scrambled_csv() -> String {
        let quotes = wavy_quotes(30);
        let mut scrambled = quotes.clone();
        scrambled.swap(4, 20);
        scrambled.swap(11, 12);
        // a revised bar arrives after the original
        scrambled.push(make_quote(7, 140.0));
        quotes_csv(&scrambled)
    }

    #[test]
    fn unordered_input_verifies_and_matches_compute() {
        let ws = Workspace::new(&scrambled_csv());
        let streamed = ws.output("stream.csv");
        let computed = ws.output("compute.csv");
        let indicators = "SMA(4),RSI(5),FRACTAL(2),STDDEV(3)";

        let code = run(&[
            "stream",
            "--input",
            ws.input(),
            "--indicator",
            indicators,
            "--output",
            path_str(&streamed),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--indicator",
            indicators,
            "--output",
            path_str(&computed),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);

        let streamed = read_output(&streamed);
        assert_eq!(streamed.len(), 31);
        assert_eq!(streamed, read_output(&computed));
    }

    #[test]
    fn aggregated_stream_verifies_and_matches_compute() {
        let ws = Workspace::new(&scrambled_csv());
        let streamed = ws.output("stream.csv");
        let computed = ws.output("compute.csv");
        let indicators = "SMA(3),FRACTAL(2)";
        // three-day bars
        for (command, out) in [("stream", &streamed), ("compute", &computed)] {
            let code = run(&[
                command,
                "--input",
                ws.input(),
                "--indicator",
                indicators,
                "--aggregate",
                "4320",
                "--output",
                path_str(out),
            ]);
            assert_eq!(code, ExitCode::SUCCESS, "{command}");
        }

        let streamed = read_output(&streamed);
        assert!(streamed.len() > 9 && streamed.len() < 14);
        assert_eq!(streamed, read_output(&computed));
    }

    #[test]
    fn bounded_provider_skips_verification() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(40)));
        let config = write_temp("[engine]\nmax_cache_size = 15\n\n[indicators]\nlist = EMA(3)\n");
        let out = ws.output("out.csv");
        let code = run(&[
            "stream",
            "--input",
            ws.input(),
            "--config",
            path_str(config.path()),
            "--output",
            path_str(&out),
        ]);
        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(read_output(&out).len(), 16);
    }

    #[test]
    fn lookback_larger_than_cache_rejected() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(10)));
        let config = write_temp("[engine]\nmax_cache_size = 5\n");
        let code = run(&[
            "stream",
            "--input",
            ws.input(),
            "--config",
            path_str(config.path()),
            "--indicator",
            "SMA(20)",
            "--no-verify",
            "--output",
            path_str(&ws.output("out.csv")),
        ]);
        assert_eq!(code, ExitCode::from(4));
    }
}

mod errors {
    use super::*;

    #[test]
    fn missing_input_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        let code = run(&[
            "compute",
            "--input",
            path_str(&missing),
            "--indicator",
            "SMA(3)",
        ]);
        assert_eq!(code, ExitCode::from(3));
    }

    #[test]
    fn malformed_quote_row_is_data_error() {
        let ws = Workspace::new("timestamp,open,high,low,close,volume\n2024-01-01,1,2,x,1,1\n");
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--indicator",
            "SMA(3)",
            "--output",
            path_str(&ws.output("out.csv")),
        ]);
        assert_eq!(code, ExitCode::from(3));
    }

    #[test]
    fn unknown_indicator_is_indicator_error() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(5)));
        let code = run(&["compute", "--input", ws.input(), "--indicator", "VWAP(3)"]);
        assert_eq!(code, ExitCode::from(4));
    }

    #[test]
    fn out_of_range_parameter_is_indicator_error() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(5)));
        let code = run(&["compute", "--input", ws.input(), "--indicator", "SMA(0)"]);
        assert_eq!(code, ExitCode::from(4));
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(5)));
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--config",
            "/nonexistent/engine.ini",
            "--indicator",
            "SMA(3)",
        ]);
        assert_eq!(code, ExitCode::from(2));
    }

    #[test]
    fn invalid_config_value_is_config_error() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(5)));
        let config = write_temp("[engine]\nmax_list_size = -3\n");
        let code = run(&[
            "compute",
            "--input",
            ws.input(),
            "--config",
            path_str(config.path()),
            "--indicator",
            "SMA(3)",
        ]);
        assert_eq!(code, ExitCode::from(2));
    }

    #[test]
    fn no_indicators_is_indicator_error() {
        let ws = Workspace::new(&quotes_csv(&wavy_quotes(5)));
        let code = run(&["stream", "--input", ws.input()]);
        assert_eq!(code, ExitCode::from(4));
    }
}

#[test]
fn list_succeeds() {
    assert_eq!(run(&["list"]), ExitCode::SUCCESS);
}
