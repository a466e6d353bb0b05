//! Protocol trace wrapper.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::message::TransportMessage;
use crate::traits::{Transport, TransportFuture, TransportType};

/// Copies every message that passes through the inner transport to a file.
///
/// Each line is `read: <json>` for inbound or `write: <json>` for outbound
/// traffic. The file is opened for appending so traces from several runs
/// accumulate.
#[derive(Debug)]
pub struct LoggingTransport {
    inner: Box<dyn Transport>,
    log: Mutex<File>,
}

impl LoggingTransport {
    async fn record(&self, direction: &str, message: &TransportMessage) {
        let mut line = Vec::with_capacity(message.size() + direction.len() + 3);
        line.extend_from_slice(direction.as_bytes());
        line.extend_from_slice(b": ");
        line.extend_from_slice(&message.payload);
        line.push(b'\n');

        let mut log = self.log.lock().await;
        if let Err(e) = log.write_all(&line).await {
            warn!("failed to write protocol log: {}", e);
        }
    }
}

/// Wrap `transport` with a protocol log when `path` is set.
///
/// A log file that cannot be opened is reported and the unwrapped transport
/// is returned.
pub async fn with_protocol_log(
    path: Option<&Path>,
    transport: Box<dyn Transport>,
) -> Box<dyn Transport> {
    let Some(path) = path else {
        return transport;
    };
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(log) => {
            info!(path = %path.display(), "logging protocol traffic");
            Box::new(LoggingTransport {
                inner: transport,
                log: Mutex::new(log),
            })
        }
        Err(e) => {
            error!(path = %path.display(), "cannot open protocol log: {}", e);
            transport
        }
    }
}

impl Transport for LoggingTransport {
    fn transport_type(&self) -> TransportType {
        self.inner.transport_type()
    }

    fn connect(&self) -> TransportFuture<'_, ()> {
        self.inner.connect()
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.record("write", &message).await;
            self.inner.send(message).await
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
        Box::pin(async move {
            let message = self.inner.receive().await?;
            if let Some(message) = &message {
                self.record("read", message).await;
            }
            Ok(message)
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let result = self.inner.close().await;
            if let Err(e) = self.log.lock().await.flush().await {
                warn!("failed to flush protocol log: {}", e);
            }
            result
        })
    }

    fn endpoint(&self) -> Option<String> {
        self.inner.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoTransport;

    #[tokio::test]
    async fn records_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proto.log");
        let (local, remote) = IoTransport::pair();

        let logged = with_protocol_log(Some(&path), Box::new(local)).await;
        logged
            .send(TransportMessage::new(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
            .await
            .unwrap();
        let _ = remote.receive().await.unwrap().unwrap();
        remote
            .send(TransportMessage::new(r#"{"jsonrpc":"2.0","result":{},"id":1}"#))
            .await
            .unwrap();
        let _ = logged.receive().await.unwrap().unwrap();
        logged.close().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"write: {"jsonrpc":"2.0","method":"ping","id":1}"#,
                r#"read: {"jsonrpc":"2.0","result":{},"id":1}"#,
            ]
        );
    }

    #[tokio::test]
    async fn unopenable_log_falls_back_to_the_plain_transport() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("proto.log");
        let (local, _remote) = IoTransport::pair();
        let transport = with_protocol_log(Some(&path), Box::new(local)).await;
        assert!(format!("{transport:?}").starts_with("IoTransport"));
    }
}
