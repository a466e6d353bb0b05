//! Transport to a locally spawned MCP server.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::io::IoTransport;
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportFuture, TransportType};

/// Speaks line-delimited JSON over a child process's stdin and stdout.
///
/// The child's stderr is inherited so its diagnostics stay visible. The
/// process is killed when the transport is closed or dropped.
#[derive(Debug)]
pub struct ChildProcessTransport {
    program: String,
    io: IoTransport,
    child: Mutex<Option<Child>>,
}

impl ChildProcessTransport {
    /// Spawn `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the process cannot be
    /// started, or [`TransportError::ConfigurationError`] if its stdio could
    /// not be captured.
    pub fn spawn<I, S>(program: &str, args: I) -> TransportResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::ConnectionFailed(format!("spawning {program}: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConfigurationError("child process stdin was not piped".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConfigurationError("child process stdout was not piped".to_string())
        })?;

        info!(program, pid = child.id(), "spawned local server");
        Ok(Self {
            program: program.to_string(),
            io: IoTransport::from_raw(TransportType::ChildProcess, stdout, stdin),
            child: Mutex::new(Some(child)),
        })
    }
}

impl Transport for ChildProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::ChildProcess
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, ()> {
        self.io.send(message)
    }

    fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
        self.io.receive()
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.io.close().await?;
            if let Some(mut child) = self.child.lock().await.take() {
                if let Err(e) = child.kill().await {
                    warn!(program = %self.program, "failed to kill child process: {}", e);
                }
                debug!(program = %self.program, "child process stopped");
            }
            Ok(())
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("process://{}", self.program))
    }
}
