//! Seams between the proxy and the upstream server.
//!
//! [`UpstreamSession`] is one initialized MCP client session; [`Connector`]
//! makes new ones. The session manager and synchronizer only see these
//! traits, which is what lets tests drive them with scripted upstreams.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mirrormcp_protocol::{
    CallToolResult, GetPromptResult, Implementation, InitializeResult, JsonRpcNotification, Prompt,
    ReadResourceResult, Resource, Tool,
};
use serde_json::{Map, Value};

use crate::client::ClientSession;
use crate::config::EndpointConfig;
use crate::error::ProxyResult;

/// Callback for notifications the upstream sends on its own.
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// An initialized session with an upstream MCP server.
#[async_trait]
pub trait UpstreamSession: Send + Sync + 'static {
    /// Result of the initialize handshake.
    fn initialize_result(&self) -> &InitializeResult;

    /// Liveness probe.
    async fn ping(&self) -> ProxyResult<()>;

    /// All tools, following pagination to the end.
    async fn list_tools(&self) -> ProxyResult<Vec<Tool>>;

    /// All prompts, following pagination to the end.
    async fn list_prompts(&self) -> ProxyResult<Vec<Prompt>>;

    /// All resources, following pagination to the end.
    async fn list_resources(&self) -> ProxyResult<Vec<Resource>>;

    /// Invoke a tool.
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

    /// Tear the session down. Errors are logged, not returned.
    async fn close(&self);
}

/// Opens upstream sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector
    type Session: UpstreamSession;

    /// Connect and complete the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened or the handshake
    /// fails.
    async fn connect(
        &self,
        notifications: Option<NotificationHandler>,
    ) -> ProxyResult<Self::Session>;
}

/// Connects to a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConnector {
    endpoint: EndpointConfig,
    client_info: Implementation,
}

impl EndpointConnector {
    /// Create a connector for `endpoint`, identifying as `client_info`.
    #[must_use]
    pub fn new(endpoint: EndpointConfig, client_info: Implementation) -> Self {
        Self {
            endpoint,
            client_info,
        }
    }

    /// Endpoint this connector dials
    #[must_use]
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for EndpointConnector {
    type Session = ClientSession;

    async fn connect(
        &self,
        notifications: Option<NotificationHandler>,
    ) -> ProxyResult<ClientSession> {
        let transport = self.endpoint.transport()?;
        ClientSession::connect(transport, self.client_info.clone(), notifications).await
    }
}
