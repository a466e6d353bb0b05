//! Incremental Server-Sent Events decoder.

use std::ops::ControlFlow;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One decoded event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `None` means the default `message` type
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether this event carries a JSON-RPC message
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Buffers raw bytes and yields complete events.
///
/// Chunks from the network may split events, lines or even UTF-8 sequences
/// anywhere, so decoding happens only once a blank line closes an event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// New empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                events.push(event);
            }
        }
        events
    }
}

/// Decode an HTTP body as an event stream, handing each event to `handle`.
///
/// Returns when the body ends, the body errors, `cancel` fires or `handle`
/// breaks.
pub(crate) async fn drain_events<S>(
    body: S,
    cancel: &CancellationToken,
    mut handle: impl FnMut(SseEvent) -> ControlFlow<()>,
) where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return,
            chunk = body.next() => chunk,
        };
        match chunk {
            None => return,
            Some(Err(e)) => {
                warn!("event stream failed: {}", e);
                return;
            }
            Some(Ok(bytes)) => {
                for event in decoder.feed(&bytes) {
                    if handle(event).is_break() {
                        return;
                    }
                }
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data.push(value),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    event.data = data.join("\n");
    Some(event)
}
