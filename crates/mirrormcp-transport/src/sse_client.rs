//! Legacy HTTP+SSE client transport.
//!
//! A GET opens a long-lived event stream. The server's first `endpoint`
//! event names the URL that client messages are POSTed to; every later
//! `message` event carries one server message.

use std::ops::ControlFlow;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::sse::drain_events;
use crate::traits::{Transport, TransportFuture, TransportType};

/// How long to wait for the `endpoint` event after the stream opens.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP+SSE client transport.
#[derive(Debug)]
pub struct SseClientTransport {
    url: Url,
    client: reqwest::Client,
    post_endpoint: RwLock<Option<Url>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<TransportMessage>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SseClientTransport {
    /// Create a transport for the event stream at `url`.
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        Self {
            url,
            client,
            post_endpoint: RwLock::new(None),
            inbox: Mutex::new(None),
            reader: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }
}

impl Drop for SseClientTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Transport for SseClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    context: format!("GET {}", self.url),
                });
            }

            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let (endpoint_tx, endpoint_rx) = oneshot::channel();
            let base = self.url.clone();
            let cancel = self.cancel.clone();

            // The pump task owns the only sender, so the inbox closes when the
            // event stream ends.
            let task = tokio::spawn(async move {
                let mut endpoint_tx = Some(endpoint_tx);
                drain_events(response.bytes_stream(), &cancel, |event| {
                    match event.event.as_deref() {
                        Some("endpoint") => match base.join(event.data.trim()) {
                            Ok(endpoint) => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(endpoint);
                                }
                            }
                            Err(e) => warn!("invalid endpoint {:?}: {}", event.data, e),
                        },
                        _ if event.is_message() => {
                            if inbox_tx.send(TransportMessage::new(event.data)).is_err() {
                                return ControlFlow::Break(());
                            }
                        }
                        other => debug!(event = ?other, "ignoring event"),
                    }
                    ControlFlow::Continue(())
                })
                .await;
                debug!("event stream closed");
            });

            let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
                Ok(Ok(endpoint)) => endpoint,
                Ok(Err(_)) => {
                    task.abort();
                    return Err(TransportError::ConnectionFailed(
                        "event stream ended before the endpoint event".to_string(),
                    ));
                }
                Err(_) => {
                    task.abort();
                    return Err(TransportError::ConnectionFailed(format!(
                        "no endpoint event within {ENDPOINT_TIMEOUT:?}"
                    )));
                }
            };

            info!(stream = %self.url, endpoint = %endpoint, "event stream connected");
            *self.post_endpoint.write().await = Some(endpoint);
            *self.inbox.lock().await = Some(inbox_rx);
            *self.reader.lock().await = Some(task);
            Ok(())
        })
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let endpoint = self.post_endpoint.read().await.clone().ok_or_else(|| {
                TransportError::ConnectionFailed("event stream not connected".to_string())
            })?;

            let response = self
                .client
                .post(endpoint.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(message.payload)
                .send()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    context: format!("POST {endpoint}"),
                });
            }
            Ok(())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
        Box::pin(async move {
            let mut guard = self.inbox.lock().await;
            let inbox = guard.as_mut().ok_or_else(|| {
                TransportError::ConnectionFailed("event stream not connected".to_string())
            })?;
            tokio::select! {
                () = self.cancel.cancelled() => Ok(None),
                message = inbox.recv() => Ok(message),
            }
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            if let Some(task) = self.reader.lock().await.take() {
                task.abort();
            }
            Ok(())
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.url.to_string())
    }
}
