//! Result output port.

use crate::domain::error::HubError;
use crate::domain::registry::IndicatorTable;

/// Port for writing indicator result tables.
pub trait ResultSink {
    /// Writes the tables side by side, one row per distinct timestamp.
    fn write_tables(&mut self, tables: &[IndicatorTable]) -> Result<(), HubError>;
}
