//! Shared CLI argument types

use clap::{Args, ValueEnum};
use secrecy::SecretString;

use crate::config::{EndpointConfig, TransportFlavor};
use crate::error::ProxyResult;

/// Connection to a remote MCP server
#[derive(Debug, Clone, Args)]
pub struct UpstreamArgs {
    /// API key for the remote server
    #[arg(long, value_name = "KEY", env = "MIRRORMCP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Header that carries the API key
    #[arg(long, value_name = "NAME")]
    pub header: Option<String>,

    /// Use the legacy SSE transport instead of streamable HTTP
    #[arg(long)]
    pub sse: bool,
}

impl UpstreamArgs {
    /// Endpoint configuration for `url`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid URL or credential.
    pub fn endpoint(&self, url: &str) -> ProxyResult<EndpointConfig> {
        let flavor = if self.sse {
            TransportFlavor::Sse
        } else {
            TransportFlavor::StreamableHttp
        };
        let key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);
        Ok(EndpointConfig::new(url)?
            .with_flavor(flavor)
            .with_credential(self.header.as_deref(), key)?)
    }
}

/// How much detail `list` prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ViewMode {
    /// One line per entry
    #[default]
    Brief,
    /// Signature and a one-line description
    Summary,
    /// Signature and the full description
    Detailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(api_key: Option<&str>, header: Option<&str>, sse: bool) -> UpstreamArgs {
        UpstreamArgs {
            api_key: api_key.map(str::to_string),
            header: header.map(str::to_string),
            sse,
        }
    }

    #[test]
    fn sse_flag_selects_flavor() {
        let endpoint = args(None, None, true).endpoint("http://localhost/sse").unwrap();
        assert_eq!(endpoint.flavor(), TransportFlavor::Sse);
    }

    #[test]
    fn empty_key_is_ignored() {
        let endpoint = args(Some(""), None, false)
            .endpoint("http://localhost/mcp")
            .unwrap();
        assert!(endpoint.credential().is_none());
    }

    #[test]
    fn key_and_header_build_a_credential() {
        let endpoint = args(Some("secret"), Some("X-Api-Key"), false)
            .endpoint("http://localhost/mcp")
            .unwrap();
        assert_eq!(endpoint.credential().unwrap().name().as_str(), "x-api-key");
    }
}
