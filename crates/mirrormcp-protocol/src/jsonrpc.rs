//! # JSON-RPC 2.0 envelope
//!
//! The proxy only needs enough of JSON-RPC to move MCP messages between two
//! peers: requests, responses, notifications and the error object. Payloads
//! stay as [`serde_json::Value`] until a caller asks for a typed view.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker, always serialized as `"2.0"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(D::Error::custom(format!(
                "Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier. MCP allows both numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric identifier
    Number(i64),
    /// String identifier
    String(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A call that expects exactly one response with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: MessageId,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: MessageId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC response payload, either a result or an error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// `{"result": ...}`
    Success { result: Value },
    /// `{"error": {...}}`
    Error { error: JsonRpcError },
}

/// Reply to a [`JsonRpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Request identifier, null only for parse errors
    pub id: ResponseId,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: MessageId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId(Some(id)),
        }
    }

    /// Build an error reply. `id` is `None` only when the request could not be parsed.
    pub fn error(error: JsonRpcError, id: Option<MessageId>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId(id),
        }
    }

    /// Result value, if this is a success response
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// Error object, if this is an error response
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }
}

/// Response ID. Parse errors carry a null ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<MessageId>);

impl ResponseId {
    pub fn as_message_id(&self) -> Option<&MessageId> {
        self.0.as_ref()
    }
}

/// A one-way message; the receiver never replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    /// Free-form detail; passed through untouched when forwarding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error with one of the standard codes and a custom message
    pub fn with_code(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.code(), message)
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

/// Standard JSON-RPC error codes plus the MCP resource-not-found code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params (-32602)
    InvalidParams,
    /// Internal error (-32603)
    InternalError,
    /// Resource not found (-32002)
    ResourceNotFound,
    /// Application-defined error
    ApplicationError(i32),
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ResourceNotFound => -32002,
            Self::ApplicationError(code) => *code,
        }
    }

    /// Default message used when nothing more specific is known.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ResourceNotFound => "Resource not found",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self::new(code.code(), code.message())
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32002 => Self::ResourceNotFound,
            other => Self::ApplicationError(other),
        }
    }
}

/// Any single JSON-RPC message.
///
/// Deserialization classifies by shape rather than by trial: an object with
/// both `method` and `id` is a request, `method` alone is a notification and
/// anything else must be a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let Some(object) = value.as_object() else {
            return Err(D::Error::custom("JSON-RPC message must be an object"));
        };

        let has_method = object.contains_key("method");
        let has_id = object.get("id").is_some_and(|id| !id.is_null());

        let message = if has_method && has_id {
            serde_json::from_value(value).map(Self::Request)
        } else if has_method {
            serde_json::from_value(value).map(Self::Notification)
        } else {
            serde_json::from_value(value).map(Self::Response)
        };
        message.map_err(D::Error::custom)
    }
}

impl JsonRpcMessage {
    /// Decode one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the bytes are not a valid JSON-RPC message.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize the message to bytes
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn to_vec(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(value: JsonRpcRequest) -> Self {
        Self::Request(value)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(value: JsonRpcNotification) -> Self {
        Self::Notification(value)
    }
}

/// Decode optional params into a typed value.
///
/// Missing params decode as an empty object so that structs whose fields are
/// all optional still parse.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidParams`] if the params do not match `T`.
pub fn decode_params<T>(params: Option<Value>) -> ProtocolResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let value = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn classifies_requests_notifications_and_responses() {
        let request: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(ref r) if r.id == MessageId::Number(7)));

        let notification: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
        )
        .unwrap();
        assert_eq!(
            notification.method(),
            Some("notifications/tools/list_changed")
        );
        assert!(matches!(notification, JsonRpcMessage::Notification(_)));

        let response: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        match response {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id.as_message_id(), Some(&MessageId::from("a")));
                assert_eq!(r.result(), Some(&json!({})));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn error_response_keeps_code() {
        let message = JsonRpcMessage::from_slice(
            br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad"}}"#,
        )
        .unwrap();
        let JsonRpcMessage::Response(response) = message else {
            panic!("expected response");
        };
        let error = response.error_object().unwrap();
        assert_eq!(JsonRpcErrorCode::from(error.code), JsonRpcErrorCode::InvalidParams);
        assert_eq!(error.message, "bad");
    }

    #[test]
    fn parse_error_response_serializes_null_id() {
        let response = JsonRpcResponse::error(JsonRpcErrorCode::ParseError.into(), None);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "error": {"code": -32700, "message": "Parse error"}, "id": null})
        );
    }

    #[test]
    fn rejects_wrong_version() {
        let result = JsonRpcMessage::from_slice(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_objects() {
        assert!(JsonRpcMessage::from_slice(b"[1,2,3]").is_err());
        assert!(JsonRpcMessage::from_slice(b"not json").is_err());
    }

    #[test]
    fn decode_params_defaults_missing_params() {
        #[derive(Deserialize)]
        struct Cursor {
            cursor: Option<String>,
        }
        let decoded: Cursor = decode_params(None).unwrap();
        assert!(decoded.cursor.is_none());

        let invalid: ProtocolResult<Cursor> = decode_params(Some(json!({"cursor": 3})));
        assert!(matches!(invalid, Err(ProtocolError::InvalidParams(_))));
    }

    fn message_id() -> impl Strategy<Value = MessageId> {
        prop_oneof![
            any::<i64>().prop_map(MessageId::Number),
            "[a-z0-9-]{1,12}".prop_map(MessageId::from),
        ]
    }

    fn params() -> impl Strategy<Value = Option<Value>> {
        proptest::option::of(
            proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..4)
                .prop_map(|map| json!(map)),
        )
    }

    proptest! {
        #[test]
        fn shape_decides_between_request_and_notification(
            method in "[a-z][a-z/_]{0,23}",
            id in message_id(),
            params in params(),
        ) {
            let request = JsonRpcRequest::new(method.clone(), params.clone(), id);
            let mut value = serde_json::to_value(&request).unwrap();

            let parsed: JsonRpcMessage = serde_json::from_value(value.clone()).unwrap();
            prop_assert_eq!(parsed, JsonRpcMessage::Request(request));

            value["id"] = Value::Null;
            let parsed: JsonRpcMessage = serde_json::from_value(value).unwrap();
            match parsed {
                JsonRpcMessage::Notification(notification) => {
                    prop_assert_eq!(notification.method, method);
                    prop_assert_eq!(notification.params, params);
                }
                other => prop_assert!(false, "expected a notification, got {:?}", other),
            }
        }

        #[test]
        fn every_error_code_survives_classification(code in any::<i32>()) {
            prop_assert_eq!(JsonRpcErrorCode::from(code).code(), code);
        }
    }
}
