//! Failures of the byte pipes underneath a session.

use thiserror::Error;

/// Result alias used throughout the transport crate.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Why a transport could not deliver or produce a message.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The peer could not be reached.
    #[error("could not reach peer: {0}")]
    ConnectionFailed(String),

    /// The peer went away after the link was up.
    #[error("peer disconnected: {0}")]
    ConnectionLost(String),

    #[error("could not send: {0}")]
    SendFailed(String),

    #[error("could not receive: {0}")]
    ReceiveFailed(String),

    /// The remote answered with a non-success HTTP status.
    #[error("HTTP {status}: {context}")]
    HttpStatus {
        /// Status code returned by the server
        status: u16,
        /// Request that failed
        context: String,
    },

    /// A frame was not valid JSON.
    #[error("malformed frame: {0}")]
    SerializationFailed(String),

    /// The peer broke the framing rules (bad SSE event, missing endpoint).
    #[error("framing violation: {0}")]
    ProtocolError(String),

    /// Bad URL or header supplied when building the transport.
    #[error("invalid transport settings: {0}")]
    ConfigurationError(String),

    #[error("transport is closed")]
    Closed,

    #[error("i/o: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::HttpStatus {
                status: status.as_u16(),
                context: err.to_string(),
            }
        } else if err.is_connect() || err.is_timeout() {
            Self::ConnectionFailed(err.to_string())
        } else {
            Self::ConnectionLost(err.to_string())
        }
    }
}

impl TransportError {
    /// Whether the failure concerns reaching the peer at all
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectionLost(_) | Self::HttpStatus { .. } | Self::Closed
        )
    }
}
