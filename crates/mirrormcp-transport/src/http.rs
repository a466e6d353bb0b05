//! HTTP client construction with an optional static credential header.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{TransportError, TransportResult};

/// Time allowed to establish a TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Header name used by session-aware streamable HTTP servers.
pub const MCP_SESSION_ID: &str = "Mcp-Session-Id";

/// A header attached to every outbound request.
#[derive(Clone)]
pub struct CredentialHeader {
    name: HeaderName,
    value: SecretString,
}

impl std::fmt::Debug for CredentialHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHeader")
            .field("name", &self.name)
            .field("value", &"***")
            .finish()
    }
}

impl CredentialHeader {
    /// Build a credential header.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] if `name` is not a valid
    /// header name or the value contains characters not allowed in headers.
    pub fn new(name: &str, value: SecretString) -> TransportResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TransportError::ConfigurationError(format!("invalid header name {name:?}: {e}"))
        })?;
        HeaderValue::from_str(value.expose_secret()).map_err(|_| {
            TransportError::ConfigurationError(format!(
                "credential for header {name} contains invalid characters"
            ))
        })?;
        Ok(Self { name, value })
    }

    /// Header name
    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    fn header_value(&self) -> TransportResult<HeaderValue> {
        let mut value = HeaderValue::from_str(self.value.expose_secret()).map_err(|_| {
            TransportError::ConfigurationError("credential contains invalid characters".to_string())
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Build the HTTP client shared by the SSE and streamable HTTP transports.
///
/// When a credential is supplied it becomes a default header, so it is sent
/// with the event-stream GET, every POST and the session DELETE alike.
///
/// # Errors
///
/// Returns [`TransportError::ConfigurationError`] if the client cannot be built.
pub fn build_http_client(credential: Option<&CredentialHeader>) -> TransportResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(credential) = credential {
        headers.insert(credential.name.clone(), credential.header_value()?);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TransportError::ConfigurationError(format!("building HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_secret() {
        let header = CredentialHeader::new("X-Api-Key", SecretString::from("hunter2")).unwrap();
        let rendered = format!("{header:?}");
        assert!(rendered.contains("x-api-key"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn rejects_invalid_header_names() {
        let err = CredentialHeader::new("bad header", SecretString::from("k")).unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
    }

    #[test]
    fn rejects_values_with_newlines() {
        let err = CredentialHeader::new("X-Api-Key", SecretString::from("a\nb")).unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
    }
}
