//! Quote input port.

use crate::domain::error::HubError;
use crate::domain::quote::Quote;

pub trait QuoteSource {
    /// Loads every record in source order. Out-of-order and repeated
    /// timestamps are passed through untouched; a provider sorts them out.
    fn load_quotes(&self) -> Result<Vec<Quote>, HubError>;
}
