//! # mirrormcp-protocol
//!
//! JSON-RPC 2.0 envelope and the subset of Model Context Protocol types the
//! mirrormcp proxy reads, forwards and re-serves.
//!
//! Types keep unknown fields where a proxy must pass data through untouched,
//! so a newer upstream server does not lose information on the way to the
//! downstream client.

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, MessageId, ResponseId, decode_params,
};
pub use types::*;

/// Protocol version this implementation speaks by default
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions accepted during negotiation, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Maximum size of a single message in bytes
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
