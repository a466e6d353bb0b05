//! Scripted upstreams shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mirrormcp_protocol::{
    CallToolResult, GetPromptResult, Implementation, InitializeResult, JsonRpcError,
    JsonRpcNotification, LATEST_PROTOCOL_VERSION, Prompt, PromptArgument, PromptMessage,
    PromptsCapability, ReadResourceResult, Resource, ResourceContents, ResourcesCapability, Role,
    ServerCapabilities, Tool, ToolsCapability,
};
use mirrormcp_proxy::{
    BackoffConfig, CapabilityKind, ClientSession, Connector, Forwarder, HandlerRegistry,
    HandlerSink, LocalServer, NotificationHandler, ProxyError, ProxyResult, ServerDescriptor,
    UpstreamSession,
};
use mirrormcp_transport::IoTransport;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Generous bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Backoff short enough for tests.
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(80),
    }
}

pub fn echo_tool() -> Tool {
    Tool::new("echo", "Echo a message back").with_input_schema(json!({
        "type": "object",
        "properties": {"message": {"type": "string"}},
        "required": ["message"]
    }))
}

pub fn add_tool() -> Tool {
    Tool::new("add", "Add two numbers").with_input_schema(json!({
        "type": "object",
        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        "required": ["a", "b"]
    }))
}

pub fn greet_prompt() -> Prompt {
    let mut prompt = Prompt::new("greet", "Greet someone");
    prompt.arguments = Some(vec![PromptArgument {
        name: "name".into(),
        required: Some(true),
        ..PromptArgument::default()
    }]);
    prompt
}

pub fn help_prompt() -> Prompt {
    Prompt::new("help", "Explain the available tools")
}

pub fn config_resource() -> Resource {
    Resource::new("file:///config.json", "config").with_mime_type("application/json")
}

/// Behavior of the upstream's tools, prompts and resources.
#[derive(Debug, Default)]
pub struct Behavior {
    pub calls: Mutex<Vec<(String, Option<Map<String, Value>>)>>,
}

#[async_trait]
impl Forwarder for Behavior {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        self.calls.lock().push((name.to_string(), arguments.clone()));
        let arguments = arguments.unwrap_or_default();
        match name {
            "echo" => {
                let message = arguments.get("message").and_then(Value::as_str).unwrap_or_default();
                Ok(CallToolResult::text(format!("echo: {message}")))
            }
            "add" => {
                let a = arguments.get("a").and_then(Value::as_f64).unwrap_or_default();
                let b = arguments.get("b").and_then(Value::as_f64).unwrap_or_default();
                Ok(CallToolResult::text(format!("sum: {}", a + b)))
            }
            "quota" => Err(ProxyError::Upstream(JsonRpcError::new(-32001, "quota exceeded"))),
            other => Err(ProxyError::Upstream(JsonRpcError::new(
                -32602,
                format!("unknown tool {other}"),
            ))),
        }
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> ProxyResult<GetPromptResult> {
        let who = arguments
            .as_ref()
            .and_then(|args| args.get("name"))
            .map_or("stranger", String::as_str);
        let text = match name {
            "greet" => format!("Hello, {who}!"),
            _ => "Try the echo and add tools.".to_string(),
        };
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::text(Role::User, text)],
            meta: None,
        })
    }

    async fn read_resource(&self, uri: &str) -> ProxyResult<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                uri,
                Some("application/json"),
                r#"{"debug":true}"#,
            )],
            meta: None,
        })
    }
}

pub fn full_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        tools: Some(ToolsCapability {
            list_changed: Some(true),
        }),
        prompts: Some(PromptsCapability {
            list_changed: Some(true),
        }),
        resources: Some(ResourcesCapability {
            subscribe: None,
            list_changed: Some(true),
        }),
        ..ServerCapabilities::default()
    }
}

/// A real MCP server (the local server type) standing in for the remote,
/// reachable through in-memory pipes.
pub fn loopback_upstream() -> Arc<LocalServer> {
    let descriptor = ServerDescriptor {
        info: Implementation::new("scripted-upstream", "1.0.0"),
        capabilities: full_capabilities(),
        instructions: Some("Use echo for testing.".to_string()),
    };
    let server = Arc::new(LocalServer::new(
        descriptor,
        Arc::new(HandlerRegistry::new()),
        Arc::new(Behavior::default()),
    ));
    server.add_handler(echo_tool());
    server.add_handler(add_tool());
    server.add_handler(Tool::new("quota", "Always over quota"));
    server.add_handler(greet_prompt());
    server.add_handler(help_prompt());
    server.add_handler(config_resource());
    server
}

/// Dials a [`loopback_upstream`] through a fresh pipe per connection.
pub struct LoopbackConnector {
    upstream: Arc<LocalServer>,
    cancel: CancellationToken,
}

impl LoopbackConnector {
    pub fn new(upstream: Arc<LocalServer>) -> Self {
        Self {
            upstream,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that ends every upstream connection served so far.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Session = ClientSession;

    async fn connect(
        &self,
        notifications: Option<NotificationHandler>,
    ) -> ProxyResult<ClientSession> {
        let (client, server) = IoTransport::pair();
        let upstream = Arc::clone(&self.upstream);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let _ = upstream.serve(Box::new(server), &cancel).await;
        });
        ClientSession::connect(
            Box::new(client),
            Implementation::new("loopback-client", "0.0.0"),
            notifications,
        )
        .await
    }
}

/// Shared state of a scripted upstream that is driven directly, without a
/// wire protocol.
#[derive(Default)]
pub struct ScriptedState {
    pub tools: Mutex<Vec<Tool>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub resources: Mutex<Vec<Resource>>,
    pub behavior: Behavior,
    /// List requests fail while set
    pub fail_lists: AtomicBool,
    /// Connection attempts are refused while set
    pub unavailable: AtomicBool,
    /// Sessions from an older generation fail their ping
    pub generation: AtomicUsize,
    pub attempts: AtomicUsize,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    /// Milliseconds every connect and list call takes
    pub latency_ms: AtomicU64,
    handler: Mutex<Option<NotificationHandler>>,
}

impl ScriptedState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        *state.tools.lock() = vec![echo_tool(), add_tool()];
        *state.prompts.lock() = vec![greet_prompt(), help_prompt()];
        *state.resources.lock() = vec![config_resource()];
        Arc::new(state)
    }

    /// Make every existing session fail its next ping.
    pub fn restart(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Deliver a list-changed notification through the latest session.
    pub fn notify(&self, kind: CapabilityKind) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(JsonRpcNotification::new(kind.list_changed_method(), None));
        }
    }

    pub fn session(self: &Arc<Self>) -> ScriptedSession {
        ScriptedSession {
            state: Arc::clone(self),
            generation: self.generation.load(Ordering::SeqCst),
            initialized: InitializeResult {
                protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                capabilities: full_capabilities(),
                server_info: Implementation::new("scripted", "1.0.0"),
                instructions: None,
                meta: None,
            },
        }
    }

    async fn pause(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    async fn list<T: Clone>(&self, entries: &Mutex<Vec<T>>) -> ProxyResult<Vec<T>> {
        self.pause().await;
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ProxyError::Upstream(JsonRpcError::new(-32603, "listing broke")));
        }
        Ok(entries.lock().clone())
    }
}

/// One session with a [`ScriptedState`].
pub struct ScriptedSession {
    state: Arc<ScriptedState>,
    generation: usize,
    initialized: InitializeResult,
}

#[async_trait]
impl UpstreamSession for ScriptedSession {
    fn initialize_result(&self) -> &InitializeResult {
        &self.initialized
    }

    async fn ping(&self) -> ProxyResult<()> {
        if self.state.generation.load(Ordering::SeqCst) == self.generation {
            Ok(())
        } else {
            Err(ProxyError::ConnectionClosed)
        }
    }

    async fn list_tools(&self) -> ProxyResult<Vec<Tool>> {
        self.state.list(&self.state.tools).await
    }

    async fn list_prompts(&self) -> ProxyResult<Vec<Prompt>> {
        self.state.list(&self.state.prompts).await
    }

    async fn list_resources(&self) -> ProxyResult<Vec<Resource>> {
        self.state.list(&self.state.resources).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        self.state.behavior.call_tool(name, arguments).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> ProxyResult<GetPromptResult> {
        self.state.behavior.get_prompt(name, arguments).await
    }

    async fn read_resource(&self, uri: &str) -> ProxyResult<ReadResourceResult> {
        self.state.behavior.read_resource(uri).await
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector over a [`ScriptedState`].
#[derive(Clone)]
pub struct ScriptedConnector {
    pub state: Arc<ScriptedState>,
}

impl ScriptedConnector {
    pub fn new(state: Arc<ScriptedState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(
        &self,
        notifications: Option<NotificationHandler>,
    ) -> ProxyResult<ScriptedSession> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        self.state.pause().await;
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(ProxyError::connection("upstream unavailable"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.handler.lock() = notifications;
        Ok(self.state.session())
    }
}

/// A downstream MCP client on `transport`, plus the methods of every
/// notification it receives.
pub async fn downstream(transport: IoTransport) -> (ClientSession, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: NotificationHandler = Arc::new(move |notification: JsonRpcNotification| {
        let _ = tx.send(notification.method);
    });
    let session = tokio::time::timeout(
        WAIT,
        ClientSession::connect(
            Box::new(transport),
            Implementation::new("downstream", "0.0.0"),
            Some(handler),
        ),
    )
    .await
    .expect("downstream handshake timed out")
    .expect("downstream handshake failed");
    (session, rx)
}

/// Wait for `method` on a notification stream, skipping others.
pub async fn expect_notification(rx: &mut mpsc::UnboundedReceiver<String>, method: &str) {
    tokio::time::timeout(WAIT, async {
        while let Some(received) = rx.recv().await {
            if received == method {
                return;
            }
        }
        panic!("notification stream closed before {method}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {method}"));
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

pub fn names(tools: &[Tool]) -> Vec<&str> {
    tools.iter().map(|tool| tool.name.as_str()).collect()
}
