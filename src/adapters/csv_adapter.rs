//! CSV quote reader and result writer.
//!
//! Quote files carry a header row naming `timestamp` (or `date`), `open`,
//! `high`, `low`, `close` and `volume` in any order. Timestamps are
//! `%Y-%m-%d` or `%Y-%m-%d %H:%M:%S`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::info;

use crate::domain::error::HubError;
use crate::domain::quote::Quote;
use crate::domain::registry::IndicatorTable;
use crate::ports::data_port::QuoteSource;
use crate::ports::report_port::ResultSink;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CsvQuoteSource {
    path: PathBuf,
}

impl CsvQuoteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuoteSource for CsvQuoteSource {
    fn load_quotes(&self) -> Result<Vec<Quote>, HubError> {
        let file = File::open(&self.path).map_err(|e| HubError::Data {
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;
        let quotes = read_quotes(file)?;
        info!("loaded {} quotes from {}", quotes.len(), self.path.display());
        Ok(quotes)
    }
}

/// Parses quote rows from any reader, keeping their order.
pub fn read_quotes<R: Read>(reader: R) -> Result<Vec<Quote>, HubError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers().map_err(|e| HubError::Data {
        reason: format!("CSV header error: {}", e),
    })?;
    let layout = ColumnLayout::from_headers(headers)?;

    let mut quotes = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| HubError::Data {
            reason: format!("CSV parse error: {}", e),
        })?;
        // header is line 1
        let line = row + 2;
        let field = |index: usize, name: &str| {
            record.get(index).ok_or_else(|| HubError::Data {
                reason: format!("line {line}: missing {name} column"),
            })
        };
        let number = |index: usize, name: &str| -> Result<f64, HubError> {
            field(index, name)?.parse().map_err(|e| HubError::Data {
                reason: format!("line {line}: invalid {name} value: {e}"),
            })
        };

        let timestamp = parse_timestamp(field(layout.timestamp, "timestamp")?).ok_or_else(
            || HubError::Data {
                reason: format!("line {line}: invalid timestamp"),
            },
        )?;
        quotes.push(Quote {
            timestamp,
            open: number(layout.open, "open")?,
            high: number(layout.high, "high")?,
            low: number(layout.low, "low")?,
            close: number(layout.close, "close")?,
            volume: number(layout.volume, "volume")?,
        });
    }
    Ok(quotes)
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Midnight timestamps print as bare dates.
pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    if timestamp.time() == NaiveTime::MIN {
        timestamp.format(DATE_FORMAT).to_string()
    } else {
        timestamp.format(DATETIME_FORMAT).to_string()
    }
}

struct ColumnLayout {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl ColumnLayout {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, HubError> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
                .ok_or_else(|| HubError::Data {
                    reason: format!("missing {} column", names[0]),
                })
        };
        Ok(Self {
            timestamp: find(&["timestamp", "date"])?,
            open: find(&["open"])?,
            high: find(&["high"])?,
            low: find(&["low"])?,
            close: find(&["close"])?,
            volume: find(&["volume"])?,
        })
    }
}

/// Writes result tables as one CSV joined on timestamp. Undefined values
/// are empty cells.
pub struct CsvResultWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvResultWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W, HubError> {
        self.writer.into_inner().map_err(|e| HubError::Data {
            reason: format!("CSV flush error: {}", e.error()),
        })
    }
}

impl CsvResultWriter<File> {
    pub fn create(path: &Path) -> Result<Self, HubError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> ResultSink for CsvResultWriter<W> {
    fn write_tables(&mut self, tables: &[IndicatorTable]) -> Result<(), HubError> {
        let width: usize = tables.iter().map(|t| t.columns.len()).sum();
        let mut header = vec!["timestamp".to_string()];
        header.extend(tables.iter().flat_map(IndicatorTable::headers));

        let mut joined: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
        let mut offset = 0;
        for table in tables {
            for row in &table.rows {
                let cells = joined
                    .entry(row.timestamp)
                    .or_insert_with(|| vec![None; width]);
                for (i, value) in row.values.iter().enumerate() {
                    cells[offset + i] = *value;
                }
            }
            offset += table.columns.len();
        }

        let csv_err = |e: csv::Error| HubError::Data {
            reason: format!("CSV write error: {}", e),
        };
        self.writer.write_record(&header).map_err(csv_err)?;
        for (timestamp, cells) in &joined {
            let mut record = vec![format_timestamp(*timestamp)];
            record.extend(
                cells
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            self.writer.write_record(&record).map_err(csv_err)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::IndicatorRow;
    use tempfile::NamedTempFile;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn reads_rows_in_file_order() {
        let data = "timestamp,open,high,low,close,volume\n\
                    2024-01-03,1,2,0.5,1.5,100\n\
                    2024-01-02,1,2,0.5,1.2,200\n\
                    2024-01-02 15:30:00,1,2,0.5,1.3,300\n";
        let quotes = read_quotes(data.as_bytes()).unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].timestamp, ts(3));
        assert_eq!(quotes[1].close, 1.2);
        assert_eq!(
            quotes[2].timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn columns_found_by_name() {
        let data = "Volume,Close,Low,High,Open,Date\n10,4,1,5,2,2024-01-05\n";
        let quotes = read_quotes(data.as_bytes()).unwrap();
        assert_eq!(quotes[0].open, 2.0);
        assert_eq!(quotes[0].volume, 10.0);
        assert_eq!(quotes[0].timestamp, ts(5));
    }

    #[test]
    fn missing_column_rejected() {
        let data = "timestamp,open,high,low,close\n2024-01-02,1,2,0.5,1.2\n";
        let err = read_quotes(data.as_bytes()).unwrap_err();
        assert!(matches!(err, HubError::Data { reason } if reason.contains("volume")));
    }

    #[test]
    fn bad_value_reports_line() {
        let data = "timestamp,open,high,low,close,volume\n\
                    2024-01-02,1,2,0.5,1.2,100\n\
                    2024-01-03,1,x,0.5,1.2,100\n";
        let err = read_quotes(data.as_bytes()).unwrap_err();
        assert!(matches!(err, HubError::Data { reason } if reason.starts_with("line 3")));
    }

    #[test]
    fn bad_timestamp_rejected() {
        let data = "timestamp,open,high,low,close,volume\n01/02/2024,1,2,0.5,1.2,100\n";
        assert!(read_quotes(data.as_bytes()).is_err());
    }

    #[test]
    fn source_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "date,open,high,low,close,volume\n2024-01-02,1,2,0.5,1.2,100\n").unwrap();
        let source = CsvQuoteSource::new(file.path());
        assert_eq!(source.load_quotes().unwrap().len(), 1);
    }

    #[test]
    fn source_missing_file_is_data_error() {
        let source = CsvQuoteSource::new("/nonexistent/quotes.csv");
        assert!(matches!(source.load_quotes(), Err(HubError::Data { .. })));
    }

    #[test]
    fn writer_joins_tables_on_timestamp() {
        let first = IndicatorTable {
            label: "SMA(2)".to_string(),
            columns: &["sma"],
            rows: vec![
                IndicatorRow {
                    timestamp: ts(1),
                    values: vec![None],
                },
                IndicatorRow {
                    timestamp: ts(2),
                    values: vec![Some(1.5)],
                },
            ],
        };
        let second = IndicatorTable {
            label: "ROC(1)".to_string(),
            columns: &["momentum", "roc"],
            rows: vec![IndicatorRow {
                timestamp: ts(2),
                values: vec![Some(1.0), Some(100.0)],
            }],
        };

        let mut writer = CsvResultWriter::new(Vec::new());
        writer.write_tables(&[first, second]).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,SMA(2).sma,ROC(1).momentum,ROC(1).roc");
        assert_eq!(lines[1], "2024-01-01,,,");
        assert_eq!(lines[2], "2024-01-02,1.5,1,100");
    }

    #[test]
    fn intraday_timestamps_keep_time() {
        let stamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(format_timestamp(stamp), "2024-03-01 09:30:00");
        assert_eq!(parse_timestamp("2024-03-01 09:30:00"), Some(stamp));
    }
}
