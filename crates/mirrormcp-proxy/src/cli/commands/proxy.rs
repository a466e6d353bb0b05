//! Proxy command implementation
//!
//! Serves the remote server's tools, prompts and resources on stdio until
//! stdin closes, Ctrl-C arrives, or the mirror fails.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use mirrormcp_transport::{IoTransport, with_protocol_log};
use tracing::info;

use super::cancel_on_interrupt;
use crate::cli::args::UpstreamArgs;
use crate::config::{ProxyOptions, ResyncPolicy};
use crate::error::{ProxyError, ProxyResult};
use crate::proxy::Proxy;

/// Behavior when the mirror cannot be brought back in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResyncFailure {
    /// Stop the proxy with an error
    #[default]
    Exit,
    /// Keep serving the last known mirror
    Degrade,
}

impl From<ResyncFailure> for ResyncPolicy {
    fn from(value: ResyncFailure) -> Self {
        match value {
            ResyncFailure::Exit => ResyncPolicy::Exit,
            ResyncFailure::Degrade => ResyncPolicy::Degrade,
        }
    }
}

/// Mirror a remote MCP server onto stdio
///
/// # Examples
///
///   mirrormcp proxy --url https://example.com/mcp
///
///   mirrormcp proxy --url https://example.com/sse --sse \
///     --api-key $KEY --header X-Api-Key --logproto proto.log
#[derive(Debug, Args)]
pub struct ProxyCommand {
    /// Remote MCP server URL
    #[arg(long, value_name = "URL", env = "MIRRORMCP_URL")]
    pub url: String,

    /// Remote connection options
    #[command(flatten)]
    pub upstream: UpstreamArgs,

    /// Record every local protocol message to this file
    #[arg(long, value_name = "PATH")]
    pub logproto: Option<PathBuf>,

    /// What to do when a change notification cannot be applied
    #[arg(long, value_enum, default_value_t = ResyncFailure::Exit)]
    pub on_resync_failure: ResyncFailure,
}

impl ProxyCommand {
    /// Execute the proxy command
    pub async fn execute(self) -> ProxyResult<()> {
        let endpoint = self.upstream.endpoint(&self.url)?;
        let options = ProxyOptions {
            resync_policy: self.on_resync_failure.into(),
            ..ProxyOptions::default()
        };

        info!(url = %endpoint.url(), flavor = ?endpoint.flavor(), pid = std::process::id(), "starting");

        let proxy = Proxy::new(endpoint, options);
        cancel_on_interrupt(proxy.shutdown_token());

        let transport =
            with_protocol_log(self.logproto.as_deref(), Box::new(IoTransport::stdio())).await;
        let result = proxy.run(transport).await;
        proxy.close().await;

        info!(pid = std::process::id(), "exiting");
        match result {
            Err(ProxyError::Cancelled) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        cmd: ProxyCommand,
    }

    #[test]
    fn defaults_to_exit_on_resync_failure() {
        let parsed = Harness::try_parse_from(["proxy", "--url", "http://localhost/mcp"]).unwrap();
        assert_eq!(parsed.cmd.on_resync_failure, ResyncFailure::Exit);
        assert!(parsed.cmd.logproto.is_none());
    }

    #[test]
    fn degrade_policy_is_selectable() {
        let parsed = Harness::try_parse_from([
            "proxy",
            "--url",
            "http://localhost/mcp",
            "--on-resync-failure",
            "degrade",
        ])
        .unwrap();
        assert_eq!(
            ResyncPolicy::from(parsed.cmd.on_resync_failure),
            ResyncPolicy::Degrade
        );
    }
}
