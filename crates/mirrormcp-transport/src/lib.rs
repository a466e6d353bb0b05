//! # mirrormcp-transport
//!
//! Message transports for the mirrormcp proxy.
//!
//! | Transport | Used for |
//! |---|---|
//! | [`IoTransport`] | the local stdio endpoint, in-memory pairs |
//! | [`ChildProcessTransport`] | listing a locally spawned server |
//! | [`SseClientTransport`] | legacy HTTP+SSE upstreams |
//! | [`StreamableHttpClientTransport`] | streamable HTTP upstreams |
//! | [`LoggingTransport`] | protocol traces wrapped around any of the above |
//!
//! All of them implement [`Transport`], which moves raw JSON-RPC payloads and
//! leaves correlation of requests and responses to the caller.

pub mod child_process;
pub mod error;
pub mod http;
pub mod io;
pub mod logging;
pub mod message;
pub mod sse;
pub mod sse_client;
pub mod streamable_http;
pub mod traits;

pub use child_process::ChildProcessTransport;
pub use error::{TransportError, TransportResult};
pub use http::{CredentialHeader, build_http_client};
pub use io::IoTransport;
pub use logging::{LoggingTransport, with_protocol_log};
pub use message::TransportMessage;
pub use sse::{SseDecoder, SseEvent};
pub use sse_client::SseClientTransport;
pub use streamable_http::StreamableHttpClientTransport;
pub use traits::{Transport, TransportFuture, TransportType};
