//! Local MCP server facade.
//!
//! Serves the mirrored capability set to downstream clients over any
//! [`Transport`]. Lists are answered from the [`HandlerRegistry`];
//! invocations go through a [`Forwarder`]. Each request runs in its own task,
//! so a slow upstream call does not block pings or lists. Whenever the
//! registry changes, every live session is sent the matching list-changed
//! notification.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mirrormcp_protocol::{
    CallToolResult, GetPromptParams, GetPromptResult, Implementation, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Prompt, ReadResourceParams, ReadResourceResult,
    Resource, SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, Tool, decode_params, methods,
};
use mirrormcp_transport::{Transport, TransportMessage};
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::capability::{CapabilityKind, MirroredEntry};
use crate::error::{ProxyError, ProxyResult};
use crate::registry::{HandlerId, HandlerRegistry, HandlerSink};

/// Where local invocations are sent.
#[async_trait]
pub trait Forwarder: Send + Sync + 'static {
    /// Invoke a tool with already decoded arguments.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult>;

    /// Render a prompt.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> ProxyResult<GetPromptResult>;

    /// Read a resource.
    async fn read_resource(&self, uri: &str) -> ProxyResult<ReadResourceResult>;
}

/// What the local server announces in its initialize result.
#[derive(Debug, Clone, Default)]
pub struct ServerDescriptor {
    /// Server identity
    pub info: Implementation,
    /// Advertised capabilities
    pub capabilities: ServerCapabilities,
    /// Usage instructions passed through to clients
    pub instructions: Option<String>,
}

/// One connected downstream client.
#[derive(Debug)]
pub struct DownstreamSession {
    id: u64,
    transport: Arc<dyn Transport>,
    closed: CancellationToken,
}

impl DownstreamSession {
    /// Session number, unique within a server
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// End the session.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.transport.close().await {
            debug!(session = self.id, "error closing downstream transport: {}", e);
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> ProxyResult<()> {
        let message = TransportMessage::from_jsonrpc(&message)?;
        self.transport.send(message).await?;
        Ok(())
    }

    async fn notify_changed(&self, kind: CapabilityKind) {
        let notification = JsonRpcNotification::new(kind.list_changed_method(), None);
        if let Err(e) = self.send(notification.into()).await {
            warn!(session = self.id, %kind, "failed to send list_changed: {}", e);
        }
    }
}

/// The local MCP server.
pub struct LocalServer {
    descriptor: ServerDescriptor,
    registry: Arc<HandlerRegistry>,
    forwarder: Arc<dyn Forwarder>,
    sessions: Mutex<BTreeMap<u64, Arc<DownstreamSession>>>,
    next_session: AtomicU64,
}

impl std::fmt::Debug for LocalServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServer")
            .field("descriptor", &self.descriptor)
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

/// Arguments of `tools/call` before they are decoded for forwarding.
#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Decode raw tool arguments into the key-value form sent upstream.
///
/// Absent or `null` arguments forward as absent.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidArguments`] for anything but an object.
pub fn decode_tool_arguments(arguments: Option<Value>) -> ProxyResult<Option<Map<String, Value>>> {
    match arguments {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Map::<String, Value>::deserialize(value)
            .map(Some)
            .map_err(|e| ProxyError::invalid_arguments(format!("expected a JSON object: {e}"))),
    }
}

fn invalid_params(message: impl Into<String>) -> JsonRpcError {
    JsonRpcError::with_code(JsonRpcErrorCode::InvalidParams, message)
}

fn to_result<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::with_code(JsonRpcErrorCode::InternalError, e.to_string()))
}

/// Registrations go through the facade so every change reaches the
/// connected downstream sessions as a list-changed notification.
impl HandlerSink for LocalServer {
    fn add_handler<T: MirroredEntry>(&self, entry: T) -> HandlerId {
        self.registry.add(entry)
    }

    fn remove_handlers<T: MirroredEntry>(&self, identifiers: &[String]) -> usize {
        self.registry.remove::<T>(identifiers)
    }
}

impl LocalServer {
    /// Server answering from `registry` and forwarding through `forwarder`.
    #[must_use]
    pub fn new(
        descriptor: ServerDescriptor,
        registry: Arc<HandlerRegistry>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            descriptor,
            registry,
            forwarder,
            sessions: Mutex::new(BTreeMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Initialize result template
    #[must_use]
    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Registry backing this server
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Downstream sessions that are currently connected.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Arc<DownstreamSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Close every downstream session.
    pub async fn close_sessions(&self) {
        for session in self.active_sessions() {
            session.close().await;
        }
    }

    /// Serve one downstream client until it disconnects or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to connect or fails while
    /// receiving.
    pub async fn serve(
        self: &Arc<Self>,
        transport: Box<dyn Transport>,
        cancel: &CancellationToken,
    ) -> ProxyResult<()> {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        transport.connect().await?;

        let session = Arc::new(DownstreamSession {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            transport,
            closed: cancel.child_token(),
        });
        self.sessions.lock().insert(session.id, Arc::clone(&session));
        info!(session = session.id, "downstream session started");

        let result = self.run_session(&session).await;

        self.sessions.lock().remove(&session.id);
        session.close().await;
        info!(session = session.id, "downstream session ended");
        result
    }

    async fn run_session(self: &Arc<Self>, session: &Arc<DownstreamSession>) -> ProxyResult<()> {
        let mut changes = self.registry.subscribe();
        let mut changes_open = true;
        let mut inflight = JoinSet::new();

        let result = loop {
            tokio::select! {
                () = session.closed.cancelled() => break Ok(()),
                change = changes.recv(), if changes_open => match change {
                    Ok(kind) => session.notify_changed(kind).await,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(session = session.id, skipped, "change events lagged");
                        for kind in CapabilityKind::ALL {
                            session.notify_changed(kind).await;
                        }
                    }
                    Err(RecvError::Closed) => changes_open = false,
                },
                received = session.transport.receive() => match received {
                    Ok(Some(message)) => self.dispatch(session, &message, &mut inflight).await,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(ProxyError::from(e)),
                },
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(session = session.id, "request handler panicked");
                        }
                    }
                }
            }
        };

        inflight.abort_all();
        result
    }

    async fn dispatch(
        self: &Arc<Self>,
        session: &Arc<DownstreamSession>,
        message: &TransportMessage,
        inflight: &mut JoinSet<()>,
    ) {
        match message.parse() {
            Ok(JsonRpcMessage::Request(request)) => {
                let server = Arc::clone(self);
                let session = Arc::clone(session);
                inflight.spawn(async move {
                    let response = server.handle_request(request).await;
                    if let Err(e) = session.send(response.into()).await {
                        warn!(session = session.id, "failed to send response: {}", e);
                    }
                });
            }
            Ok(JsonRpcMessage::Notification(notification)) => match notification.method.as_str() {
                methods::INITIALIZED => debug!(session = session.id, "client initialized"),
                method => trace!(session = session.id, %method, "ignoring notification"),
            },
            Ok(JsonRpcMessage::Response(_)) => {
                debug!(session = session.id, "ignoring unsolicited response");
            }
            Err(e) => {
                warn!(session = session.id, "unparseable message: {}", e);
                let response = JsonRpcResponse::error(
                    JsonRpcError::with_code(JsonRpcErrorCode::ParseError, e.to_string()),
                    None,
                );
                if let Err(e) = session.send(response.into()).await {
                    warn!(session = session.id, "failed to send parse error: {}", e);
                }
            }
        }
    }

    /// Answer one request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.route(request).await {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, Some(id)),
        }
    }

    async fn route(&self, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let JsonRpcRequest { method, params, .. } = request;
        let capabilities = &self.descriptor.capabilities;
        match method.as_str() {
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(Value::Object(Map::new())),
            methods::TOOLS_LIST if capabilities.tools.is_some() => to_result(ListToolsResult {
                tools: self.registry.entries::<Tool>(),
                next_cursor: None,
            }),
            methods::TOOLS_CALL if capabilities.tools.is_some() => self.call_tool(params).await,
            methods::PROMPTS_LIST if capabilities.prompts.is_some() => {
                to_result(ListPromptsResult {
                    prompts: self.registry.entries::<Prompt>(),
                    next_cursor: None,
                })
            }
            methods::PROMPTS_GET if capabilities.prompts.is_some() => {
                self.get_prompt(params).await
            }
            methods::RESOURCES_LIST if capabilities.resources.is_some() => {
                to_result(ListResourcesResult {
                    resources: self.registry.entries::<Resource>(),
                    next_cursor: None,
                })
            }
            methods::RESOURCES_READ if capabilities.resources.is_some() => {
                self.read_resource(params).await
            }
            other => Err(JsonRpcError::with_code(
                JsonRpcErrorCode::MethodNotFound,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams =
            decode_params(params).map_err(|e| invalid_params(e.to_string()))?;
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str())
        {
            params.protocol_version
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };
        info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            protocol = %protocol_version,
            "downstream client connected"
        );
        to_result(InitializeResult {
            protocol_version,
            capabilities: self.descriptor.capabilities.clone(),
            server_info: self.descriptor.info.clone(),
            instructions: self.descriptor.instructions.clone(),
            meta: None,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let call: RawToolCall = decode_params(params).map_err(|e| invalid_params(e.to_string()))?;
        if !self.registry.contains::<Tool>(&call.name) {
            return Err(invalid_params(format!("Unknown tool: {}", call.name)));
        }
        let arguments = decode_tool_arguments(call.arguments).map_err(|e| e.to_jsonrpc_error())?;
        let result = self
            .forwarder
            .call_tool(&call.name, arguments)
            .await
            .map_err(|e| {
                warn!(tool = %call.name, "tool call failed: {}", e);
                e.to_jsonrpc_error()
            })?;
        to_result(result)
    }

    async fn get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams =
            decode_params(params).map_err(|e| invalid_params(e.to_string()))?;
        if !self.registry.contains::<Prompt>(&params.name) {
            return Err(invalid_params(format!("Unknown prompt: {}", params.name)));
        }
        let result = self
            .forwarder
            .get_prompt(&params.name, params.arguments)
            .await
            .map_err(|e| {
                warn!(prompt = %params.name, "get prompt failed: {}", e);
                e.to_jsonrpc_error()
            })?;
        to_result(result)
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams =
            decode_params(params).map_err(|e| invalid_params(e.to_string()))?;
        if !self.registry.contains::<Resource>(&params.uri) {
            return Err(JsonRpcError::with_code(
                JsonRpcErrorCode::ResourceNotFound,
                format!("Resource not found: {}", params.uri),
            )
            .with_data(serde_json::json!({ "uri": params.uri })));
        }
        let result = self
            .forwarder
            .read_resource(&params.uri)
            .await
            .map_err(|e| {
                warn!(uri = %params.uri, "read resource failed: {}", e);
                e.to_jsonrpc_error()
            })?;
        to_result(result)
    }
}
