//! The mirroring proxy.
//!
//! ```text
//!  local client ──stdio──▶ LocalServer ──Forwarder──▶ SessionManager ──HTTP──▶ upstream
//!                              ▲                                         │
//!                              └── Synchronizer ◀── list_changed ────────┘
//! ```
//!
//! [`Proxy::run`] connects upstream (failing fast), builds the local server
//! from the upstream initialize result, mirrors every advertised kind, then
//! serves the local transport. Upstream list-changed notifications trigger a
//! background resynchronization of that kind; how a failed pass is handled
//! is up to the [`ResyncPolicy`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mirrormcp_protocol::{
    CallToolResult, GetPromptResult, InitializeResult, JsonRpcNotification, PromptsCapability,
    ReadResourceResult, ResourcesCapability, ServerCapabilities, ToolsCapability,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mirrormcp_transport::Transport;

use crate::capability::CapabilityKind;
use crate::config::{EndpointConfig, ProxyOptions, ResyncPolicy};
use crate::error::{ProxyError, ProxyResult};
use crate::registry::HandlerRegistry;
use crate::server::{Forwarder, LocalServer, ServerDescriptor};
use crate::session::SessionManager;
use crate::sync::{SyncReport, Synchronizer};
use crate::upstream::{Connector, EndpointConnector, NotificationHandler, UpstreamSession};

struct ProxyInner<C: Connector> {
    sessions: SessionManager<C>,
    registry: Arc<HandlerRegistry>,
    /// Set by `run` once the local server exists; synchronizes into it.
    mirror: OnceLock<Synchronizer<LocalServer>>,
    options: ProxyOptions,
    shutdown: CancellationToken,
    upstream_capabilities: OnceLock<ServerCapabilities>,
    stale: AtomicBool,
}

impl<C: Connector> ProxyInner<C> {
    async fn resync(&self, kind: CapabilityKind) -> ProxyResult<SyncReport> {
        let synchronizer = self
            .mirror
            .get()
            .ok_or_else(|| ProxyError::configuration("local server is not running"))?;
        self.sessions
            .with_session(&self.shutdown, |session| async move {
                synchronizer.synchronize_kind(kind, session.as_ref()).await
            })
            .await
    }

    fn advertises(&self, kind: CapabilityKind) -> bool {
        self.upstream_capabilities
            .get()
            .is_some_and(|capabilities| kind.is_advertised(capabilities))
    }
}

#[async_trait]
impl<C: Connector> Forwarder for ProxyInner<C> {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        self.sessions
            .with_session(&self.shutdown, |session| async move {
                session.call_tool(name, arguments).await
            })
            .await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> ProxyResult<GetPromptResult> {
        self.sessions
            .with_session(&self.shutdown, |session| async move {
                session.get_prompt(name, arguments).await
            })
            .await
    }

    async fn read_resource(&self, uri: &str) -> ProxyResult<ReadResourceResult> {
        self.sessions
            .with_session(&self.shutdown, |session| async move {
                session.read_resource(uri).await
            })
            .await
    }
}

/// Local capabilities for an upstream: every advertised kind, with
/// `listChanged` set because the mirror may change at any time.
fn mirrored_capabilities(upstream: &ServerCapabilities) -> ServerCapabilities {
    ServerCapabilities {
        tools: upstream.tools.as_ref().map(|_| ToolsCapability {
            list_changed: Some(true),
        }),
        prompts: upstream.prompts.as_ref().map(|_| PromptsCapability {
            list_changed: Some(true),
        }),
        resources: upstream.resources.as_ref().map(|_| ResourcesCapability {
            subscribe: None,
            list_changed: Some(true),
        }),
        ..ServerCapabilities::default()
    }
}

/// Mirrors one upstream MCP server onto a local transport.
pub struct Proxy<C: Connector = EndpointConnector> {
    inner: Arc<ProxyInner<C>>,
    changes: Mutex<Option<mpsc::UnboundedReceiver<CapabilityKind>>>,
}

impl<C: Connector> std::fmt::Debug for Proxy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("sessions", &self.inner.sessions)
            .field("policy", &self.inner.options.resync_policy)
            .field("stale", &self.is_mirror_stale())
            .finish_non_exhaustive()
    }
}

impl Proxy<EndpointConnector> {
    /// Proxy for the HTTP endpoint `endpoint`.
    #[must_use]
    pub fn new(endpoint: EndpointConfig, options: ProxyOptions) -> Self {
        let connector = EndpointConnector::new(endpoint, options.client_info.clone());
        Self::with_connector(connector, options)
    }
}

impl<C: Connector> Proxy<C> {
    /// Proxy dialing upstream through `connector`.
    #[must_use]
    pub fn with_connector(connector: C, options: ProxyOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: NotificationHandler = Arc::new(move |notification: JsonRpcNotification| {
            if let Some(kind) = CapabilityKind::from_list_changed(&notification.method) {
                debug!(%kind, "upstream list changed");
                let _ = tx.send(kind);
            }
        });

        let sessions = SessionManager::new(connector, options.backoff).with_notifications(handler);
        Self {
            inner: Arc::new(ProxyInner {
                sessions,
                registry: Arc::new(HandlerRegistry::new()),
                mirror: OnceLock::new(),
                options,
                shutdown: CancellationToken::new(),
                upstream_capabilities: OnceLock::new(),
                stale: AtomicBool::new(false),
            }),
            changes: Mutex::new(Some(rx)),
        }
    }

    /// Token that stops the proxy when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Registry holding the mirrored handlers.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Local server, once [`Self::run`] has connected upstream.
    #[must_use]
    pub fn local_server(&self) -> Option<Arc<LocalServer>> {
        self.inner
            .mirror
            .get()
            .map(|synchronizer| Arc::clone(synchronizer.sink()))
    }

    /// Whether a resynchronization failed under [`ResyncPolicy::Degrade`].
    #[must_use]
    pub fn is_mirror_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Relaxed)
    }

    /// Connect, mirror and serve `transport` until it closes or the proxy is
    /// shut down.
    ///
    /// # Errors
    ///
    /// Returns the connect error if the upstream is unreachable at startup,
    /// the listing error if the initial mirror fails, or
    /// [`ProxyError::Resync`] if a later resynchronization fails under
    /// [`ResyncPolicy::Exit`].
    pub async fn run(&self, transport: Box<dyn Transport>) -> ProxyResult<()> {
        let changes = self
            .changes
            .lock()
            .take()
            .ok_or_else(|| ProxyError::configuration("proxy is already running"))?;
        let inner = &self.inner;

        let initialized: InitializeResult = inner
            .sessions
            .with_session(&inner.shutdown, |session| async move {
                Ok(session.initialize_result().clone())
            })
            .await?;
        info!(
            server = %initialized.server_info.name,
            version = %initialized.server_info.version,
            protocol = %initialized.protocol_version,
            instructions = initialized.instructions.as_deref().unwrap_or_default(),
            "upstream initialized"
        );

        let descriptor = ServerDescriptor {
            info: inner.options.server_info.clone(),
            capabilities: mirrored_capabilities(&initialized.capabilities),
            instructions: initialized.instructions.clone(),
        };
        let forwarder: Arc<dyn Forwarder> = Arc::clone(inner) as Arc<dyn Forwarder>;
        let server = Arc::new(LocalServer::new(
            descriptor,
            Arc::clone(self.registry()),
            forwarder,
        ));
        let _ = inner.mirror.set(Synchronizer::new(Arc::clone(&server)));
        let _ = inner
            .upstream_capabilities
            .set(initialized.capabilities.clone());

        for kind in CapabilityKind::advertised_by(&initialized.capabilities) {
            let report = inner.resync(kind).await?;
            info!(%kind, count = report.total, "mirrored");
        }

        let run = inner.shutdown.child_token();
        let bridge = tokio::spawn(bridge_changes(Arc::clone(inner), changes, run.clone()));

        let served = server.serve(transport, &run).await;
        run.cancel();
        let bridged = match bridge.await {
            Ok(result) => result,
            Err(e) => {
                error!("change bridge failed: {}", e);
                Ok(())
            }
        };

        bridged?;
        served
    }

    /// Close local sessions and the upstream session.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        if let Some(server) = self.local_server() {
            server.close_sessions().await;
        }
        self.inner.sessions.close().await;
    }
}

/// Turn list-changed events into resynchronization passes.
///
/// Passes run concurrently; passes of the same kind are serialized by the
/// synchronizer.
async fn bridge_changes<C: Connector>(
    inner: Arc<ProxyInner<C>>,
    mut changes: mpsc::UnboundedReceiver<CapabilityKind>,
    run: CancellationToken,
) -> ProxyResult<()> {
    let mut passes = JoinSet::new();
    loop {
        tokio::select! {
            () = run.cancelled() => {
                passes.abort_all();
                return Ok(());
            }
            change = changes.recv() => {
                let Some(kind) = change else {
                    return Ok(());
                };
                if !inner.advertises(kind) {
                    debug!(%kind, "ignoring change for a kind the upstream does not advertise");
                    continue;
                }
                let inner = Arc::clone(&inner);
                passes.spawn(async move { (kind, inner.resync(kind).await) });
            }
            Some(joined) = passes.join_next(), if !passes.is_empty() => {
                let (kind, result) = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if e.is_panic() {
                            error!("resynchronization task panicked");
                        }
                        continue;
                    }
                };
                match result {
                    Ok(report) if report.is_unchanged() => debug!(%kind, "mirror unchanged"),
                    Ok(report) => info!(
                        %kind,
                        added = ?report.added,
                        removed = ?report.removed,
                        "mirror updated"
                    ),
                    Err(ProxyError::Cancelled) => {}
                    Err(e) => match inner.options.resync_policy {
                        ResyncPolicy::Exit => {
                            error!(%kind, "resynchronization failed, shutting down: {}", e);
                            passes.abort_all();
                            run.cancel();
                            return Err(e.resync(kind));
                        }
                        ResyncPolicy::Degrade => {
                            warn!(%kind, "resynchronization failed, serving a stale mirror: {}", e);
                            inner.stale.store(true, Ordering::Relaxed);
                        }
                    },
                }
            }
        }
    }
}
