//! Output formatters for `list`

pub mod human;
pub mod json;

use std::io::Write;

use crate::cli::args::ViewMode;
use crate::error::ProxyResult;
use crate::list::{ListOutput, ListSelection};

/// Trait for writing listing results
pub trait ListingFormatter {
    /// Format and write `listing`, covering the kinds in `selection`
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if writing to the output fails.
    fn write_listing(
        &self,
        listing: &ListOutput,
        selection: ListSelection,
        writer: &mut dyn Write,
    ) -> ProxyResult<()>;
}

/// Factory function to create the appropriate formatter
#[must_use]
pub fn get_formatter(view: ViewMode, json: bool) -> Box<dyn ListingFormatter> {
    if json {
        Box::new(json::JsonFormatter::new())
    } else {
        Box::new(human::HumanFormatter::new(view))
    }
}
