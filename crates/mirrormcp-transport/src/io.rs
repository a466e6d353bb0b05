//! Newline-delimited JSON over async byte streams.
//!
//! Used for the local stdio endpoint, for child processes and for in-memory
//! pairs in tests. Each message is one line; the JSON encoder never emits a
//! raw newline inside a message.

use std::pin::Pin;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportFuture, TransportType};

type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type LineReader = FramedRead<BoxedAsyncRead, LinesCodec>;
type LineWriter = FramedWrite<BoxedAsyncWrite, LinesCodec>;

/// Buffer size of the in-memory pipes created by [`IoTransport::pair`].
const PAIR_BUFFER_SIZE: usize = 64 * 1024;

/// Line-delimited transport over any reader/writer pair.
pub struct IoTransport {
    kind: TransportType,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<LineWriter>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for IoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoTransport")
            .field("kind", &self.kind)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl IoTransport {
    /// Transport over the current process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::from_raw(TransportType::Stdio, tokio::io::stdin(), tokio::io::stdout())
    }

    /// Transport over arbitrary streams.
    ///
    /// `reader` is what we read messages from, `writer` is where we write
    /// them. For a child process that means its stdout and its stdin.
    pub fn from_raw<R, W>(kind: TransportType, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        let reader: BoxedAsyncRead = Box::pin(reader);
        let writer: BoxedAsyncWrite = Box::pin(writer);
        let max = mirrormcp_protocol::MAX_MESSAGE_SIZE;
        Self {
            kind,
            reader: Mutex::new(Some(FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(max),
            ))),
            writer: Mutex::new(Some(FramedWrite::new(
                writer,
                LinesCodec::new_with_max_length(max),
            ))),
            closed: CancellationToken::new(),
        }
    }

    /// Two transports connected back to back in memory.
    ///
    /// Whatever one side sends, the other receives. Closing one side ends the
    /// other side's receive stream.
    pub fn pair() -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PAIR_BUFFER_SIZE);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Self::from_raw(TransportType::Memory, left_read, left_write),
            Self::from_raw(TransportType::Memory, right_read, right_write),
        )
    }
}

impl Transport for IoTransport {
    fn transport_type(&self) -> TransportType {
        self.kind
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let line = std::str::from_utf8(&message.payload)
                .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
            trace!(transport = %self.kind, "send: {}", line);

            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(TransportError::Closed)?;
            writer.send(line).await.map_err(|e| match e {
                LinesCodecError::Io(io) => TransportError::SendFailed(io.to_string()),
                LinesCodecError::MaxLineLengthExceeded => {
                    TransportError::SendFailed("message exceeds maximum size".to_string())
                }
            })
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
        Box::pin(async move {
            let mut guard = self.reader.lock().await;
            let Some(reader) = guard.as_mut() else {
                return Ok(None);
            };

            loop {
                let next = tokio::select! {
                    () = self.closed.cancelled() => return Ok(None),
                    next = reader.next() => next,
                };

                match next {
                    None => {
                        debug!(transport = %self.kind, "input stream ended");
                        *guard = None;
                        return Ok(None);
                    }
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => {
                        trace!(transport = %self.kind, "recv: {}", line);
                        return Ok(Some(TransportMessage::new(Bytes::from(line))));
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(transport = %self.kind, "dropping oversized message");
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        *guard = None;
                        return Err(TransportError::ReceiveFailed(e.to_string()));
                    }
                }
            }
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.closed.cancel();
            if let Some(mut writer) = self.writer.lock().await.take() {
                // Shutting down the write half is what lets the peer see EOF.
                if let Err(e) = SinkExt::<String>::close(&mut writer).await {
                    debug!(transport = %self.kind, "error closing writer: {}", e);
                }
            }
            Ok(())
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("{}://", self.kind))
    }
}
