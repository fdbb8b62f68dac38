//! Engine configuration read through [`ConfigPort`].
//!
//! ```ini
//! [engine]
//! max_cache_size = 500
//! max_list_size = 0
//! verify = true
//! aggregate_minutes = 60
//! fill_gaps = false
//!
//! [indicators]
//! list = SMA(20), EMA(12), MACD(12,26,9)
//! ```
//!
//! Sizes of 0 (or absent) mean unbounded. An absent or zero
//! `aggregate_minutes` feeds quotes to the indicators as they are.

use chrono::Duration;

use crate::domain::error::HubError;
use crate::domain::registry::{IndicatorCall, IndicatorRegistry};
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_cache_size: Option<usize>,
    pub max_list_size: Option<usize>,
    /// Compare streamed results against a batch run.
    pub verify: bool,
    /// Roll quotes up into bars of this many minutes first.
    pub aggregate_minutes: Option<usize>,
    pub fill_gaps: bool,
    pub indicators: Vec<IndicatorCall>,
}

impl EngineConfig {
    /// Bar period when aggregation is on.
    pub fn aggregation(&self) -> Option<Duration> {
        self.aggregate_minutes
            .and_then(|m| Duration::try_minutes(i64::try_from(m).ok()?))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cache_size: None,
            max_list_size: None,
            verify: true,
            aggregate_minutes: None,
            fill_gaps: false,
            indicators: Vec::new(),
        }
    }
}

pub fn build_engine_config(
    config: &dyn ConfigPort,
    registry: &IndicatorRegistry,
) -> Result<EngineConfig, HubError> {
    let engine = EngineConfig {
        max_cache_size: read_size(config, "max_cache_size")?,
        max_list_size: read_size(config, "max_list_size")?,
        verify: config.get_bool("engine", "verify", true),
        aggregate_minutes: read_size(config, "aggregate_minutes")?,
        fill_gaps: config.get_bool("engine", "fill_gaps", false),
        indicators: read_indicators(config, registry)?,
    };
    if engine.aggregate_minutes.is_some() && engine.aggregation().is_none() {
        return Err(HubError::ConfigInvalid {
            section: "engine".to_string(),
            key: "aggregate_minutes".to_string(),
            reason: "aggregate_minutes is too large".to_string(),
        });
    }
    Ok(engine)
}

/// Splits `SMA(20), MACD(12,26,9)` on the commas outside parentheses.
pub fn split_indicator_list(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn read_size(config: &dyn ConfigPort, key: &str) -> Result<Option<usize>, HubError> {
    let Some(raw) = config.get_string("engine", key) else {
        return Ok(None);
    };
    let value: i64 = raw.trim().parse().map_err(|_| HubError::ConfigInvalid {
        section: "engine".to_string(),
        key: key.to_string(),
        reason: format!("{key} must be an integer, got {raw:?}"),
    })?;
    if value < 0 {
        return Err(HubError::ConfigInvalid {
            section: "engine".to_string(),
            key: key.to_string(),
            reason: format!("{key} must be non-negative"),
        });
    }
    Ok((value > 0).then_some(value as usize))
}

fn read_indicators(
    config: &dyn ConfigPort,
    registry: &IndicatorRegistry,
) -> Result<Vec<IndicatorCall>, HubError> {
    let Some(list) = config.get_string("indicators", "list") else {
        return Ok(Vec::new());
    };
    split_indicator_list(&list)
        .iter()
        .map(|item| {
            let call: IndicatorCall = item.parse()?;
            registry.resolve(&call)?;
            Ok(call)
        })
        .collect::<Result<Vec<_>, HubError>>()
        .map_err(|e| HubError::ConfigInvalid {
            section: "indicators".to_string(),
            key: "list".to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn build(content: &str) -> Result<EngineConfig, HubError> {
        build_engine_config(&make_config(content), &IndicatorRegistry::with_defaults())
    }

    #[test]
    fn full_config_parses() {
        let config = build(
            r#"
[engine]
max_cache_size = 500
max_list_size = 50
verify = false

[indicators]
list = SMA(20), MACD(12,26,9), obv
"#,
        )
        .unwrap();
        assert_eq!(config.max_cache_size, Some(500));
        assert_eq!(config.max_list_size, Some(50));
        assert!(!config.verify);
        let labels: Vec<String> = config.indicators.iter().map(|c| c.to_string()).collect();
        assert_eq!(labels, vec!["SMA(20)", "MACD(12,26,9)", "OBV"]);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = build("[engine]\n").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn zero_size_means_unbounded() {
        let config = build("[engine]\nmax_cache_size = 0\n").unwrap();
        assert_eq!(config.max_cache_size, None);
    }

    #[test]
    fn negative_size_rejected() {
        let err = build("[engine]\nmax_cache_size = -5\n").unwrap_err();
        assert!(matches!(err, HubError::ConfigInvalid { key, .. } if key == "max_cache_size"));
    }

    #[test]
    fn non_numeric_size_rejected() {
        let err = build("[engine]\nmax_list_size = lots\n").unwrap_err();
        assert!(matches!(err, HubError::ConfigInvalid { key, .. } if key == "max_list_size"));
    }

    #[test]
    fn unknown_indicator_rejected() {
        let err = build("[indicators]\nlist = SMA(20), WMA(5)\n").unwrap_err();
        assert!(
            matches!(err, HubError::ConfigInvalid { section, reason, .. }
                if section == "indicators" && reason.contains("WMA"))
        );
    }

    #[test]
    fn out_of_range_parameter_rejected() {
        let err = build("[indicators]\nlist = RSI(0)\n").unwrap_err();
        assert!(matches!(err, HubError::ConfigInvalid { key, .. } if key == "list"));
    }

    #[test]
    fn aggregation_settings() {
        let config = build("[engine]\naggregate_minutes = 15\nfill_gaps = true\n").unwrap();
        assert_eq!(config.aggregation(), Some(Duration::minutes(15)));
        assert!(config.fill_gaps);
        assert_eq!(build("[engine]\naggregate_minutes = 0\n").unwrap().aggregation(), None);
        let err = build("[engine]\naggregate_minutes = hourly\n").unwrap_err();
        assert!(matches!(err, HubError::ConfigInvalid { key, .. } if key == "aggregate_minutes"));
    }

    #[test]
    fn split_respects_parentheses() {
        assert_eq!(
            split_indicator_list(" SMA(20) ,MACD(12, 26, 9),, BB "),
            vec!["SMA(20)", "MACD(12, 26, 9)", "BB"]
        );
        assert!(split_indicator_list("  ").is_empty());
    }
}
