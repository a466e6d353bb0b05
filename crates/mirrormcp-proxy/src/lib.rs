//! mirrormcp-proxy: mirror a remote MCP server onto a local stdio server
//!
//! Many MCP clients only speak stdio, while many MCP servers are only
//! reachable over HTTP. The proxy connects to a remote server (streamable
//! HTTP or legacy SSE, with an optional static API key header), copies its
//! tools, prompts and resources into a local server, forwards every call, and
//! keeps the copy current when the remote announces list changes.
//!
//! # Quick Start
//!
//! ```bash
//! # Serve a remote server to a stdio client
//! mirrormcp proxy --url https://example.com/mcp --api-key "$KEY" --header X-Api-Key
//!
//! # See what a server offers
//! mirrormcp list --url https://example.com/mcp --view summary
//! mirrormcp list -- python my_server.py
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Local side                                               │
//! │ • LocalServer: stdio MCP server answering from registry  │
//! │ • HandlerRegistry: mirrored tools / prompts / resources  │
//! └──────────────────────────────────────────────────────────┘
//!                  ↑ Synchronizer          ↓ Forwarder
//! ┌──────────────────────────────────────────────────────────┐
//! │ Upstream side                                            │
//! │ • SessionManager: ping probe, reconnect with backoff     │
//! │ • ClientSession: MCP client over an HTTP transport       │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod list;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod session;
pub mod sync;
pub mod upstream;

#[cfg(feature = "cli")]
pub mod cli;

pub use capability::{CapabilityKind, MirroredEntry};
pub use client::ClientSession;
pub use config::{BackoffConfig, EndpointConfig, ProxyOptions, ResyncPolicy, TransportFlavor};
pub use error::{ProxyError, ProxyResult};
pub use list::{ListOutput, ListSelection, list_local, list_remote};
pub use proxy::Proxy;
pub use registry::{HandlerId, HandlerRegistry, HandlerSink, Registered};
pub use server::{DownstreamSession, Forwarder, LocalServer, ServerDescriptor};
pub use session::{Backoff, SessionManager};
pub use sync::{SyncReport, Synchronizer};
pub use upstream::{Connector, EndpointConnector, NotificationHandler, UpstreamSession};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
