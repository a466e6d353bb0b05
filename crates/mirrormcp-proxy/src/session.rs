//! Upstream session lifecycle with backoff.
//!
//! The manager hands out one shared session. Before each use the cached
//! session is pinged; a session that fails the probe is closed and replaced.
//! Until the first successful connection any connect error is returned
//! immediately, after it connection errors are retried with exponential
//! backoff until the caller's cancellation token fires.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackoffConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::upstream::{Connector, NotificationHandler, UpstreamSession};

/// How long the liveness probe may take before the session counts as dead.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential delay sequence: `initial`, doubled each step, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    /// Start a sequence.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next: config.initial,
            max: config.max,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.max);
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

/// Owns the upstream session and reconnects it on demand.
pub struct SessionManager<C: Connector> {
    connector: C,
    notifications: Option<NotificationHandler>,
    backoff: BackoffConfig,
    retry: AtomicBool,
    session: Mutex<Option<Arc<C::Session>>>,
}

impl<C: Connector> std::fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("backoff", &self.backoff)
            .field("retry", &self.retry.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: Connector> SessionManager<C> {
    /// Create a manager that dials through `connector`.
    pub fn new(connector: C, backoff: BackoffConfig) -> Self {
        Self {
            connector,
            notifications: None,
            backoff,
            retry: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Deliver upstream notifications of every session to `handler`.
    #[must_use]
    pub fn with_notifications(mut self, handler: NotificationHandler) -> Self {
        self.notifications = Some(handler);
        self
    }

    /// Start with retries already enabled (or disabled).
    #[must_use]
    pub fn with_retry(self, retry: bool) -> Self {
        self.retry.store(retry, Ordering::Relaxed);
        self
    }

    /// Whether connect failures are currently retried.
    pub fn retry_enabled(&self) -> bool {
        self.retry.load(Ordering::Relaxed)
    }

    /// Whether a session is cached.
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// A live session, connecting or reconnecting as needed.
    ///
    /// # Errors
    ///
    /// Returns the connect error when retries are not enabled yet, and
    /// [`ProxyError::Cancelled`] if `cancel` fires while waiting.
    pub async fn session(&self, cancel: &CancellationToken) -> ProxyResult<Arc<C::Session>> {
        let mut backoff = Backoff::new(self.backoff);
        loop {
            let delay = {
                let mut cached = self.session.lock().await;
                if let Some(session) = cached.as_ref().map(Arc::clone) {
                    let probe = tokio::select! {
                        () = cancel.cancelled() => return Err(ProxyError::Cancelled),
                        probe = tokio::time::timeout(PING_TIMEOUT, session.ping()) => {
                            probe.unwrap_or_else(|_| Err(ProxyError::connection("ping timed out")))
                        }
                    };
                    match probe {
                        Ok(()) => return Ok(session),
                        Err(e) => {
                            warn!("upstream ping failed, reconnecting: {}", e);
                            *cached = None;
                            session.close().await;
                        }
                    }
                }

                let connected = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ProxyError::Cancelled),
                    connected = self.connector.connect(self.notifications.clone()) => connected,
                };
                match connected {
                    Ok(session) => {
                        let info = &session.initialize_result().server_info;
                        info!(
                            server = %info.name,
                            version = %info.version,
                            "upstream session established"
                        );
                        let session = Arc::new(session);
                        *cached = Some(Arc::clone(&session));
                        if !self.retry.swap(true, Ordering::Relaxed) {
                            debug!("first connection succeeded, enabling reconnect backoff");
                        }
                        return Ok(session);
                    }
                    Err(e) if !self.retry_enabled() => return Err(e),
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(?delay, "connecting to upstream failed, retrying: {}", e);
                        delay
                    }
                }
            };

            // The lock is released while sleeping.
            tokio::select! {
                () = cancel.cancelled() => return Err(ProxyError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run `action` against a live session.
    ///
    /// The action is abandoned with [`ProxyError::Cancelled`] when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns the session error from [`Self::session`] or the action's own
    /// error.
    pub async fn with_session<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        action: F,
    ) -> ProxyResult<T>
    where
        F: FnOnce(Arc<C::Session>) -> Fut,
        Fut: Future<Output = ProxyResult<T>>,
    {
        let session = self.session(cancel).await?;
        tokio::select! {
            () = cancel.cancelled() => Err(ProxyError::Cancelled),
            result = action(session) => result,
        }
    }

    /// Close and forget the cached session.
    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }
}
