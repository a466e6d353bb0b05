//! Streamable HTTP client transport.
//!
//! Every client message is its own POST. The server may answer with
//! `202 Accepted` (nothing to read), a JSON body, or an event stream that
//! carries the response and anything the server sends alongside it. Once the
//! client has sent `notifications/initialized`, a GET event stream is opened
//! for messages the server initiates on its own, such as list-changed
//! notifications.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mirrormcp_protocol::{JsonRpcMessage, methods};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::http::MCP_SESSION_ID;
use crate::message::TransportMessage;
use crate::sse::drain_events;
use crate::traits::{Transport, TransportFuture, TransportType};

/// Header carrying the negotiated protocol version on follow-up requests.
const MCP_PROTOCOL_VERSION: &str = "MCP-Protocol-Version";

/// First pause before reopening the server notification stream.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the pause between notification stream attempts.
const LISTENER_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// State shared between the transport and its notification listener.
#[derive(Debug, Default)]
struct SessionState {
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
}

/// Streamable HTTP client transport.
#[derive(Debug)]
pub struct StreamableHttpClientTransport {
    url: Url,
    client: reqwest::Client,
    state: Arc<SessionState>,
    inbox_tx: mpsc::UnboundedSender<TransportMessage>,
    inbox: Mutex<mpsc::UnboundedReceiver<TransportMessage>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl StreamableHttpClientTransport {
    /// Create a transport for the MCP endpoint at `url`.
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            url,
            client,
            state: Arc::new(SessionState::default()),
            inbox_tx,
            inbox: Mutex::new(inbox_rx),
            listener: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.state.session_id.read().await.clone()
    }

    async fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(id) = self.state.session_id.read().await.as_deref() {
            builder = builder.header(MCP_SESSION_ID, id);
        }
        if let Some(version) = self.state.protocol_version.read().await.as_deref() {
            builder = builder.header(MCP_PROTOCOL_VERSION, version);
        }
        builder
    }

    async fn deliver(&self, payload: Bytes) {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        self.note_protocol_version(&payload).await;
        // The receiver lives as long as `self`, so this only fails after drop.
        let _ = self.inbox_tx.send(TransportMessage::new(payload));
    }

    async fn note_protocol_version(&self, payload: &[u8]) {
        let Ok(JsonRpcMessage::Response(response)) = JsonRpcMessage::from_slice(payload) else {
            return;
        };
        let version = response
            .result()
            .filter(|result| result.get("serverInfo").is_some())
            .and_then(|result| result.get("protocolVersion"))
            .and_then(|version| version.as_str());
        if let Some(version) = version {
            *self.state.protocol_version.write().await = Some(version.to_string());
        }
    }

    async fn start_listener(&self) {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return;
        }
        let task = tokio::spawn(listen(
            self.url.clone(),
            self.client.clone(),
            Arc::clone(&self.state),
            self.inbox_tx.clone(),
            self.cancel.clone(),
        ));
        *listener = Some(task);
    }
}

impl Drop for StreamableHttpClientTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keep a GET event stream open for server-initiated messages.
///
/// Refusals and request errors are retried with a doubling delay so a
/// transient upstream fault does not silently stop change notifications.
/// Only `405 Method Not Allowed` ends the listener for good.
async fn listen(
    url: Url,
    client: reqwest::Client,
    state: Arc<SessionState>,
    inbox: mpsc::UnboundedSender<TransportMessage>,
    cancel: CancellationToken,
) {
    let mut delay = LISTENER_RETRY_DELAY;
    loop {
        let mut builder = client.get(url.clone()).header(ACCEPT, "text/event-stream");
        if let Some(id) = state.session_id.read().await.as_deref() {
            builder = builder.header(MCP_SESSION_ID, id);
        }
        if let Some(version) = state.protocol_version.read().await.as_deref() {
            builder = builder.header(MCP_PROTOCOL_VERSION, version);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return,
            response = builder.send() => response,
        };
        match response {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                debug!("server offers no notification stream");
                return;
            }
            Ok(response) if !response.status().is_success() => {
                warn!(
                    status = %response.status(),
                    retry_in = ?delay,
                    "notification stream refused"
                );
            }
            Err(e) => {
                warn!(retry_in = ?delay, "notification stream failed: {}", e);
            }
            Ok(response) => {
                debug!("notification stream open");
                delay = LISTENER_RETRY_DELAY;
                drain_events(response.bytes_stream(), &cancel, |event| {
                    if event.is_message()
                        && inbox.send(TransportMessage::new(event.data)).is_err()
                    {
                        return ControlFlow::Break(());
                    }
                    ControlFlow::Continue(())
                })
                .await;
            }
        }

        if inbox.is_closed() {
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        delay = next_listener_delay(delay);
    }
}

/// Double `delay`, capped at [`LISTENER_MAX_RETRY_DELAY`].
fn next_listener_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(LISTENER_MAX_RETRY_DELAY)
}

impl Transport for StreamableHttpClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let opens_session = matches!(
                message.parse(),
                Ok(JsonRpcMessage::Notification(ref n)) if n.method == methods::INITIALIZED
            );

            let builder = self
                .client
                .post(self.url.clone())
                .header(ACCEPT, "application/json, text/event-stream")
                .header(CONTENT_TYPE, "application/json")
                .body(message.payload);
            let response = self
                .request(builder)
                .await
                .send()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    context: format!("POST {}", self.url),
                });
            }

            if let Some(id) = response
                .headers()
                .get(MCP_SESSION_ID)
                .and_then(|v| v.to_str().ok())
            {
                let mut session_id = self.state.session_id.write().await;
                if session_id.as_deref() != Some(id) {
                    info!(session = id, "upstream assigned session");
                    *session_id = Some(id.to_string());
                }
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();

            if status == StatusCode::ACCEPTED {
                debug!("message accepted");
            } else if content_type.starts_with("text/event-stream") {
                // Read the reply stream inline so the response is queued
                // before the caller's next receive.
                let mut replies = Vec::new();
                drain_events(response.bytes_stream(), &self.cancel, |event| {
                    if event.is_message() {
                        replies.push(Bytes::from(event.data));
                    }
                    ControlFlow::Continue(())
                })
                .await;
                for reply in replies {
                    self.deliver(reply).await;
                }
            } else {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
                self.deliver(body).await;
            }

            if opens_session {
                self.start_listener().await;
            }
            Ok(())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
        Box::pin(async move {
            let mut inbox = self.inbox.lock().await;
            tokio::select! {
                () = self.cancel.cancelled() => Ok(None),
                message = inbox.recv() => Ok(message),
            }
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.cancel.cancel();
            if let Some(task) = self.listener.lock().await.take() {
                task.abort();
            }

            // Best effort: tell the server the session is over.
            if self.state.session_id.read().await.is_some() {
                let builder = self.request(self.client.delete(self.url.clone())).await;
                match builder.send().await {
                    Ok(response) => debug!(status = %response.status(), "session closed"),
                    Err(e) => debug!("failed to close session: {}", e),
                }
            }
            Ok(())
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.url.to_string())
    }
}
