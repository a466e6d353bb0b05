//! Core transport trait.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::TransportResult;
use crate::message::TransportMessage;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Kinds of transport this crate provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Current process stdin/stdout
    Stdio,
    /// In-memory pipe
    Memory,
    /// Spawned child process stdio
    ChildProcess,
    /// Legacy HTTP+SSE (GET event stream, POST to announced endpoint)
    Sse,
    /// Streamable HTTP (POST with JSON or SSE replies)
    StreamableHttp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stdio => "stdio",
            Self::Memory => "memory",
            Self::ChildProcess => "child-process",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        };
        f.write_str(name)
    }
}

/// A bidirectional message channel to one peer.
///
/// `send` may be called concurrently from several tasks. `receive` is driven
/// by a single reader task and yields `None` once the channel is closed.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Establishes the connection. Transports that are live on construction
    /// keep the default no-op.
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Sends a single message.
    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()>;

    /// Receives the next message, or `None` once the peer has gone away.
    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>>;

    /// Closes the transport. Pending and future `receive` calls return `None`.
    fn close(&self) -> TransportFuture<'_, ()>;

    /// Returns the endpoint address or identifier, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }
}
