//! List command implementation
//!
//! Connects to a remote server by URL, or spawns a local server command, and
//! prints what it offers.

use clap::Args;
use tokio_util::sync::CancellationToken;

use super::cancel_on_interrupt;
use crate::cli::args::{UpstreamArgs, ViewMode};
use crate::cli::output::get_formatter;
use crate::error::{ProxyError, ProxyResult};
use crate::list::{ListSelection, list_local, list_remote};

/// List the tools, prompts and resources of an MCP server
///
/// # Examples
///
///   mirrormcp list --url https://example.com/mcp --tools --view summary
///
///   mirrormcp list --json -- python server.py --port 0
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Remote MCP server URL
    #[arg(long, value_name = "URL", env = "MIRRORMCP_URL")]
    pub url: Option<String>,

    /// Remote connection options
    #[command(flatten)]
    pub upstream: UpstreamArgs,

    /// How much detail to print
    #[arg(long, value_enum, default_value_t = ViewMode::Brief)]
    pub view: ViewMode,

    /// List tools
    #[arg(long)]
    pub tools: bool,

    /// List prompts
    #[arg(long)]
    pub prompts: bool,

    /// List resources
    #[arg(long)]
    pub resources: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Local server command and its arguments
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Where the listed server lives
#[derive(Debug, PartialEq, Eq)]
enum Target<'a> {
    Remote(&'a str),
    Local(&'a str, &'a [String]),
}

impl ListCommand {
    fn target(&self) -> ProxyResult<Target<'_>> {
        match (self.url.as_deref(), self.command.split_first()) {
            (Some(url), None) => Ok(Target::Remote(url)),
            (None, Some((program, args))) => Ok(Target::Local(program, args)),
            _ => Err(ProxyError::configuration(
                "exactly one of --url or a command must be specified",
            )),
        }
    }

    /// Execute the list command
    pub async fn execute(self) -> ProxyResult<()> {
        let selection = ListSelection::from_flags(self.tools, self.prompts, self.resources);
        let cancel = CancellationToken::new();
        cancel_on_interrupt(cancel.clone());

        let result = match self.target()? {
            Target::Remote(url) => {
                let endpoint = self.upstream.endpoint(url)?;
                list_remote(endpoint, selection, &cancel).await
            }
            Target::Local(program, args) => list_local(program, args, selection, &cancel).await,
        };
        cancel.cancel();

        let listing = match result {
            Ok(listing) => listing,
            Err(ProxyError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        };

        let formatter = get_formatter(self.view, self.json);
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        formatter.write_listing(&listing, selection, &mut out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        cmd: ListCommand,
    }

    fn parse(args: &[&str]) -> ListCommand {
        Harness::try_parse_from(std::iter::once("list").chain(args.iter().copied()))
            .unwrap()
            .cmd
    }

    #[test]
    fn trailing_command_is_a_local_target() {
        let cmd = parse(&["--tools", "--", "server", "--port", "0"]);
        let args = vec!["--port".to_string(), "0".to_string()];
        assert_eq!(cmd.target().unwrap(), Target::Local("server", &args));
        assert!(cmd.tools);
    }

    #[test]
    fn url_and_command_are_exclusive() {
        let cmd = parse(&["--url", "http://localhost/mcp", "--", "server"]);
        assert!(matches!(
            cmd.target(),
            Err(ProxyError::Configuration { .. })
        ));
    }

    #[test]
    fn view_mode_parses() {
        let cmd = parse(&["--url", "http://localhost/mcp", "--view", "detailed"]);
        assert_eq!(cmd.view, ViewMode::Detailed);
        assert_eq!(cmd.target().unwrap(), Target::Remote("http://localhost/mcp"));
    }
}
