//! Transport message type.

use bytes::Bytes;
use mirrormcp_protocol::{JsonRpcMessage, ProtocolResult};

use crate::error::{TransportError, TransportResult};

/// One framed message as it travels over a transport.
///
/// The payload is kept as raw bytes so wrappers such as the protocol logger
/// see exactly what went over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Serialized JSON-RPC message
    pub payload: Bytes,
}

impl TransportMessage {
    /// Wrap a raw payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize a JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerializationFailed`] if the message cannot be encoded.
    pub fn from_jsonrpc(message: &JsonRpcMessage) -> TransportResult<Self> {
        message
            .to_vec()
            .map(Self::new)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    /// Decode the payload as a JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the payload is not a JSON-RPC message.
    pub fn parse(&self) -> ProtocolResult<JsonRpcMessage> {
        JsonRpcMessage::from_slice(&self.payload)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Payload as text, for logging.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<Vec<u8>> for TransportMessage {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<String> for TransportMessage {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
