//! JSON output formatter

use std::io::Write;

use super::ListingFormatter;
use crate::error::ProxyResult;
use crate::list::{ListOutput, ListSelection};

/// Pretty-printed JSON of the whole listing
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    /// Create a new JSON formatter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ListingFormatter for JsonFormatter {
    fn write_listing(
        &self,
        listing: &ListOutput,
        _selection: ListSelection,
        writer: &mut dyn Write,
    ) -> ProxyResult<()> {
        serde_json::to_writer_pretty(&mut *writer, listing)?;
        writeln!(writer)?;
        Ok(())
    }
}
