//! MCP model types.
//!
//! Split by protocol area. Everything is re-exported flat from the crate root.

pub mod capabilities;
pub mod content;
pub mod initialization;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use capabilities::*;
pub use content::*;
pub use initialization::*;
pub use prompts::*;
pub use resources::*;
pub use tools::*;

use serde::{Deserialize, Serialize};

/// Extension metadata carried in `_meta` fields
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Params of any paginated list request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedParams {
    /// Opaque cursor returned by the previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl PaginatedParams {
    /// Params for the page following `cursor`
    pub fn after(cursor: Option<String>) -> Self {
        Self { cursor }
    }
}
