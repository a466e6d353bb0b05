//! CLI command implementations

pub mod list;
pub mod proxy;

use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyResult;

/// All available CLI commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mirror a remote MCP server onto stdio
    #[command(visible_alias = "p")]
    Proxy(proxy::ProxyCommand),

    /// List the tools, prompts and resources of an MCP server
    #[command(visible_alias = "ls")]
    List(list::ListCommand),
}

impl Command {
    /// Execute the command
    pub async fn execute(self) -> ProxyResult<()> {
        match self {
            Command::Proxy(cmd) => cmd.execute().await,
            Command::List(cmd) => cmd.execute().await,
        }
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cannot listen for interrupt");
                    return;
                }
                tracing::info!("interrupted");
                token.cancel();
            }
        }
    });
}
