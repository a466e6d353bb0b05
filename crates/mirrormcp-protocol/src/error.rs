//! Protocol-level error types.

use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The bytes were not valid JSON or did not form a JSON-RPC message
    #[error("Invalid JSON-RPC message: {0}")]
    Json(#[from] serde_json::Error),

    /// Request params did not match the expected shape
    #[error("Invalid params: {0}")]
    InvalidParams(String),
}
