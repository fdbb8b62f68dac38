//! Crate error type.

use chrono::NaiveDateTime;

/// Top-level error type for quotehub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid parameter for {indicator}: {name} {reason}")]
    InvalidParameter {
        indicator: String,
        name: String,
        reason: String,
    },

    #[error("no record with timestamp {timestamp}")]
    TimestampNotFound { timestamp: NaiveDateTime },

    #[error("index {index} out of range for cache of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("record at {timestamp} does not sort after the current tail {tail}")]
    OutOfOrder {
        timestamp: NaiveDateTime,
        tail: NaiveDateTime,
    },

    #[error("record at {timestamp} already exists")]
    DuplicateTimestamp { timestamp: NaiveDateTime },

    #[error("provider is no longer available")]
    ProviderDropped,

    #[error("repeated update at {timestamp} exceeded {limit} attempts; check for circular chains")]
    Overflow {
        timestamp: NaiveDateTime,
        limit: u8,
    },

    #[error("unknown indicator: {id}")]
    UnknownIndicator { id: String },

    #[error("cannot parse indicator call {input:?}: {reason}")]
    IndicatorSpec { input: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HubError {
    pub(crate) fn invalid_parameter(indicator: &str, name: &str, reason: impl Into<String>) -> Self {
        HubError::InvalidParameter {
            indicator: indicator.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&HubError> for std::process::ExitCode {
    fn from(err: &HubError) -> Self {
        let code: u8 = match err {
            HubError::Io(_) => 1,
            HubError::ConfigParse { .. } | HubError::ConfigInvalid { .. } => 2,
            HubError::Data { .. } => 3,
            HubError::InvalidParameter { .. }
            | HubError::UnknownIndicator { .. }
            | HubError::IndicatorSpec { .. } => 4,
            HubError::TimestampNotFound { .. }
            | HubError::IndexOutOfRange { .. }
            | HubError::OutOfOrder { .. }
            | HubError::DuplicateTimestamp { .. }
            | HubError::ProviderDropped
            | HubError::Overflow { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_message() {
        let err = HubError::invalid_parameter("SMA", "period", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid parameter for SMA: period must be at least 1"
        );
    }

    #[test]
    fn index_out_of_range_message() {
        let err = HubError::IndexOutOfRange { index: 7, len: 3 };
        assert_eq!(err.to_string(), "index 7 out of range for cache of length 3");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HubError = io.into();
        assert!(matches!(err, HubError::Io(_)));
    }
}
