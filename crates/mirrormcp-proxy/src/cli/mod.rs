//! Command-line interface for mirrormcp
//!
//! ```text
//! cli/
//! ├── args.rs       # Upstream connection arguments
//! ├── commands/     # proxy and list
//! ├── output/       # Listing formatters
//! └── error.rs      # User-facing error display
//! ```
//!
//! In proxy mode stdout carries the MCP stream, so diagnostics only ever go
//! to stderr or to `--logfile`.

pub mod args;
pub mod commands;
pub mod error;
pub mod output;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{ProxyError, ProxyResult};

/// mirrormcp - mirror a remote MCP server onto a local stdio server
#[derive(Parser, Debug)]
#[command(
    name = "mirrormcp",
    version,
    about = "Mirror a remote MCP server's tools, prompts and resources onto stdio",
    long_about = "Connects to a remote MCP server over streamable HTTP or SSE and serves its\n\
                  tools, prompts and resources to a local client over stdio."
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: commands::Command,

    /// Enable logging (to stderr unless --logfile is given)
    #[arg(long, global = true)]
    pub log: bool,

    /// Append log output to this file (implies --log)
    #[arg(long, value_name = "PATH", global = true)]
    pub logfile: Option<PathBuf>,

    /// More detailed logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if logging cannot be set up or the command fails.
    pub async fn execute(self) -> ProxyResult<()> {
        let _guard = self.init_tracing()?;

        if self.no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        self.command.execute().await
    }

    fn filter(&self) -> EnvFilter {
        let level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Logging is off unless `--log`, `--logfile` or `RUST_LOG` asks for it.
    fn init_tracing(&self) -> ProxyResult<Option<WorkerGuard>> {
        if !self.log && self.logfile.is_none() && std::env::var_os("RUST_LOG").is_none() {
            return Ok(None);
        }

        let registry = tracing_subscriber::registry().with(self.filter());
        match &self.logfile {
            Some(path) => {
                let (dir, file_name) = split_log_path(path)?;
                // `rolling::never` panics if the file cannot be opened.
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let appender = tracing_appender::rolling::never(dir, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()
                    .map_err(|e| ProxyError::configuration(e.to_string()))?;
                Ok(Some(guard))
            }
            None => {
                registry
                    .with(
                        fmt::layer()
                            .with_target(false)
                            .with_writer(std::io::stderr),
                    )
                    .try_init()
                    .map_err(|e| ProxyError::configuration(e.to_string()))?;
                Ok(None)
            }
        }
    }
}

fn split_log_path(path: &Path) -> ProxyResult<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ProxyError::configuration_with_key(
                format!("invalid log file path {}", path.display()),
                "logfile",
            )
        })?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}
