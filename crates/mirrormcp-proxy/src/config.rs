//! Configuration types for mirrormcp-proxy

use std::time::Duration;

use mirrormcp_protocol::Implementation;
use mirrormcp_transport::{
    CredentialHeader, SseClientTransport, StreamableHttpClientTransport, Transport,
    build_http_client,
};
use secrecy::SecretString;
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Name the proxy uses when connecting upstream.
pub const CLIENT_NAME: &str = "mirrormcp-proxy-client";

/// Name the proxy announces to local clients.
pub const SERVER_NAME: &str = "mirrormcp-proxy-server";

/// Which HTTP transport to speak to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportFlavor {
    /// Streamable HTTP
    #[default]
    StreamableHttp,
    /// Legacy HTTP+SSE
    Sse,
}

/// Remote endpoint to mirror.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    url: Url,
    credential: Option<CredentialHeader>,
    flavor: TransportFlavor,
}

impl EndpointConfig {
    /// Endpoint at `url`, streamable HTTP, no credential.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if `url` does not parse or is not
    /// an `http`/`https` URL.
    pub fn new(url: &str) -> ProxyResult<Self> {
        let url = Url::parse(url).map_err(|e| {
            ProxyError::configuration_with_key(format!("invalid url {url:?}: {e}"), "url")
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::configuration_with_key(
                format!("unsupported url scheme {:?}, expected http or https", url.scheme()),
                "url",
            ));
        }
        Ok(Self {
            url,
            credential: None,
            flavor: TransportFlavor::default(),
        })
    }

    /// Attach a static credential sent in header `header`.
    ///
    /// Without a key nothing is attached, whatever `header` says.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if a key is given without a
    /// header name, or the header name or value is not valid in HTTP.
    pub fn with_credential(
        mut self,
        header: Option<&str>,
        key: Option<SecretString>,
    ) -> ProxyResult<Self> {
        self.credential = match (header, key) {
            (_, None) => None,
            (None, Some(_)) => {
                return Err(ProxyError::configuration_with_key(
                    "an api key requires a header name",
                    "header",
                ));
            }
            (Some(header), Some(key)) => Some(CredentialHeader::new(header, key).map_err(|e| {
                ProxyError::configuration_with_key(e.to_string(), "header")
            })?),
        };
        Ok(self)
    }

    /// Select the transport flavor.
    #[must_use]
    pub fn with_flavor(mut self, flavor: TransportFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Transport flavor
    #[must_use]
    pub fn flavor(&self) -> TransportFlavor {
        self.flavor
    }

    /// Credential header, if configured
    #[must_use]
    pub fn credential(&self) -> Option<&CredentialHeader> {
        self.credential.as_ref()
    }

    /// Build a fresh, unconnected transport for this endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn transport(&self) -> ProxyResult<Box<dyn Transport>> {
        let client = build_http_client(self.credential.as_ref())?;
        let url = self.url.clone();
        Ok(match self.flavor {
            TransportFlavor::StreamableHttp => {
                Box::new(StreamableHttpClientTransport::new(url, client))
            }
            TransportFlavor::Sse => Box::new(SseClientTransport::new(url, client)),
        })
    }
}

/// Reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First delay
    pub initial: Duration,
    /// Upper bound for any delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Shorter first delay used by one-shot listing.
    #[must_use]
    pub fn listing() -> Self {
        Self {
            initial: Duration::from_millis(250),
            ..Self::default()
        }
    }
}

/// What to do when a notification-triggered resynchronization fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Shut the proxy down with an error.
    #[default]
    Exit,
    /// Keep serving the last good mirror and flag it stale.
    Degrade,
}

/// Proxy behavior that is not tied to the endpoint.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Identity presented to the upstream server
    pub client_info: Implementation,
    /// Identity presented to local clients
    pub server_info: Implementation,
    /// Reconnect delays
    pub backoff: BackoffConfig,
    /// Handling of failed resynchronization
    pub resync_policy: ResyncPolicy,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")),
            server_info: Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION")),
            backoff: BackoffConfig::default(),
            resync_policy: ResyncPolicy::default(),
        }
    }
}
