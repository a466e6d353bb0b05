//! Error types for mirrormcp-proxy
//!
//! Upstream JSON-RPC errors are kept intact so they can be handed back to the
//! local client with their original code. Transport failures convert
//! automatically; everything else is a proxy-level error with context.

use mirrormcp_protocol::{JsonRpcError, JsonRpcErrorCode, ProtocolError};
use mirrormcp_transport::TransportError;
use thiserror::Error;

use crate::capability::CapabilityKind;

/// Result type for proxy operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Main error type for mirrormcp-proxy
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The upstream server answered with a JSON-RPC error
    #[error("Upstream error: {0}")]
    Upstream(JsonRpcError),

    /// Establishing an upstream session failed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The session ended while a request was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// The operation was cancelled by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Tool arguments could not be decoded into a JSON object
    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },

    /// Invalid proxy configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    /// The upstream handed out a cursor it had already returned
    #[error("{method} pagination cycled back to cursor {cursor:?}")]
    CursorCycle { method: String, cursor: String },

    /// Listing one capability kind failed
    #[error("listing {kind}: {source}")]
    Listing {
        kind: CapabilityKind,
        #[source]
        source: Box<ProxyError>,
    },

    /// A resynchronization pass failed and the mirror can no longer be trusted
    #[error("resynchronizing {kind} failed: {source}")]
    Resync {
        kind: CapabilityKind,
        #[source]
        source: Box<ProxyError>,
    },

    /// Malformed protocol payload
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an invalid-arguments error
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Wrap this error as a failed listing of `kind`
    #[must_use]
    pub fn listing(self, kind: CapabilityKind) -> Self {
        Self::Listing {
            kind,
            source: Box::new(self),
        }
    }

    /// Wrap this error as a failed resynchronization of `kind`
    #[must_use]
    pub fn resync(self, kind: CapabilityKind) -> Self {
        Self::Resync {
            kind,
            source: Box::new(self),
        }
    }

    /// Whether the error means the upstream session is unusable
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connection_error(),
            Self::Connection { .. } | Self::ConnectionClosed => true,
            _ => false,
        }
    }

    /// JSON-RPC error object to send back to a local client
    ///
    /// Upstream errors pass through untouched.
    #[must_use]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::Upstream(error) => error.clone(),
            Self::InvalidArguments { .. } => {
                JsonRpcError::with_code(JsonRpcErrorCode::InvalidParams, self.to_string())
            }
            _ => JsonRpcError::with_code(JsonRpcErrorCode::InternalError, self.to_string()),
        }
    }
}

impl From<JsonRpcError> for ProxyError {
    fn from(error: JsonRpcError) -> Self {
        Self::Upstream(error)
    }
}
