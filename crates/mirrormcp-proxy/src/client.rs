//! MCP client session over any [`Transport`].
//!
//! A background task is the only consumer of `transport.receive()`:
//!
//! ```text
//! loop {
//!     msg = transport.receive()
//!     Response     => wake the waiting request() through its oneshot
//!     Notification => hand to the notification handler
//!     Request      => answer ping, refuse everything else
//! }
//! ```
//!
//! When the transport ends, every outstanding request fails with
//! [`ProxyError::ConnectionClosed`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use mirrormcp_protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, JsonRpcError, JsonRpcErrorCode,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload,
    LATEST_PROTOCOL_VERSION, ListPromptsResult, ListResourcesResult, ListToolsResult, MessageId,
    PaginatedParams, Prompt, ReadResourceParams, ReadResourceResult, Resource,
    SUPPORTED_PROTOCOL_VERSIONS, Tool, methods,
};
use mirrormcp_transport::{Transport, TransportMessage};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::upstream::{NotificationHandler, UpstreamSession};

/// Request/response plumbing shared with the routing task.
struct Peer {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<MessageId, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicI64,
    closed: CancellationToken,
}

/// Removes a pending waiter when its request future is dropped.
struct PendingGuard<'a> {
    peer: &'a Peer,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.peer.pending.lock().remove(&self.id);
    }
}

impl Peer {
    async fn send(&self, message: &JsonRpcMessage) -> ProxyResult<()> {
        let message = TransportMessage::from_jsonrpc(message)?;
        self.transport.send(message).await?;
        Ok(())
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> ProxyResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.closed.is_cancelled() {
            return Err(ProxyError::ConnectionClosed);
        }
        let params = params.map(serde_json::to_value).transpose()?;
        let id = MessageId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            peer: self,
            id: id.clone(),
        };

        self.send(&JsonRpcRequest::new(method, params, id).into())
            .await?;

        let response = tokio::select! {
            () = self.closed.cancelled() => return Err(ProxyError::ConnectionClosed),
            response = rx => response.map_err(|_| ProxyError::ConnectionClosed)?,
        };
        match response.payload {
            JsonRpcResponsePayload::Success { result } => Ok(serde_json::from_value(result)?),
            JsonRpcResponsePayload::Error { error } => Err(ProxyError::Upstream(error)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ProxyResult<()> {
        self.send(&JsonRpcNotification::new(method, params).into())
            .await
    }
}

async fn route_messages(peer: Arc<Peer>, notifications: Option<NotificationHandler>) {
    loop {
        let received = tokio::select! {
            () = peer.closed.cancelled() => break,
            received = peer.transport.receive() => received,
        };
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("upstream closed the session");
                break;
            }
            Err(e) => {
                warn!("upstream receive failed: {}", e);
                break;
            }
        };

        match message.parse() {
            Ok(JsonRpcMessage::Response(response)) => {
                let Some(id) = response.id.as_message_id() else {
                    warn!("upstream sent a response without an id");
                    continue;
                };
                let waiter = peer.pending.lock().remove(id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(%id, "response for an unknown request"),
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                trace!(method = %notification.method, "upstream notification");
                if let Some(handler) = &notifications {
                    handler(notification);
                }
            }
            Ok(JsonRpcMessage::Request(request)) => answer_upstream_request(&peer, request).await,
            Err(e) => warn!("discarding malformed upstream message: {}", e),
        }
    }

    peer.closed.cancel();
    peer.pending.lock().clear();
}

/// The proxy offers no client features, so only ping gets a real answer.
async fn answer_upstream_request(peer: &Peer, request: JsonRpcRequest) {
    let response = if request.method == methods::PING {
        JsonRpcResponse::success(Value::Object(Map::new()), request.id)
    } else {
        debug!(method = %request.method, "refusing upstream request");
        JsonRpcResponse::error(
            JsonRpcError::with_code(
                JsonRpcErrorCode::MethodNotFound,
                format!("Method not found: {}", request.method),
            ),
            Some(request.id),
        )
    };
    if let Err(e) = peer.send(&response.into()).await {
        warn!("failed to answer upstream request: {}", e);
    }
}

/// An initialized client session.
pub struct ClientSession {
    peer: Arc<Peer>,
    initialize_result: InitializeResult,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("transport", &self.peer.transport.transport_type())
            .field("server", &self.initialize_result.server_info.name)
            .field("closed", &self.peer.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Connect `transport` and run the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to connect, the server rejects
    /// `initialize`, or the connection drops during the handshake. The
    /// transport is closed in every error case.
    pub async fn connect(
        transport: Box<dyn Transport>,
        client_info: Implementation,
        notifications: Option<NotificationHandler>,
    ) -> ProxyResult<Self> {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        if let Err(e) = transport.connect().await {
            if let Err(close) = transport.close().await {
                debug!("error closing upstream transport: {}", close);
            }
            return Err(e.into());
        }

        let peer = Arc::new(Peer {
            transport,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            closed: CancellationToken::new(),
        });
        let router = tokio::spawn(route_messages(Arc::clone(&peer), notifications));

        match handshake(&peer, client_info).await {
            Ok(initialize_result) => Ok(Self {
                peer,
                initialize_result,
                router: Mutex::new(Some(router)),
            }),
            Err(e) => {
                router.abort();
                shutdown(&peer).await;
                Err(e)
            }
        }
    }

    /// Whether the underlying connection has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.peer.closed.is_cancelled()
    }

    /// Follow `nextCursor` until the upstream stops handing one out.
    ///
    /// A cursor seen before means the upstream is cycling; that is an error
    /// rather than a truncated list.
    async fn list_all<T, R>(
        &self,
        method: &str,
        into_page: impl Fn(R) -> (Vec<T>, Option<String>) + Send,
    ) -> ProxyResult<Vec<T>>
    where
        T: Send,
        R: DeserializeOwned,
    {
        let mut all = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: R = self
                .peer
                .request(method, Some(PaginatedParams::after(cursor.clone())))
                .await?;
            let (items, next) = into_page(page);
            all.extend(items);
            match next {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        warn!(%method, cursor = %next, "upstream cursor cycle");
                        return Err(ProxyError::CursorCycle {
                            method: method.to_string(),
                            cursor: next,
                        });
                    }
                    cursor = Some(next);
                }
                _ => return Ok(all),
            }
        }
    }
}

async fn handshake(peer: &Peer, client_info: Implementation) -> ProxyResult<InitializeResult> {
    let params = InitializeParams {
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities::default(),
        client_info,
    };
    let result: InitializeResult = peer.request(methods::INITIALIZE, Some(params)).await?;
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
        warn!(
            version = %result.protocol_version,
            "upstream negotiated an unrecognized protocol version"
        );
    }
    peer.notify(methods::INITIALIZED, None).await?;
    Ok(result)
}

async fn shutdown(peer: &Peer) {
    peer.closed.cancel();
    if let Err(e) = peer.transport.close().await {
        debug!("error closing upstream transport: {}", e);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.peer.closed.cancel();
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
    }
}

#[async_trait]
impl UpstreamSession for ClientSession {
    fn initialize_result(&self) -> &InitializeResult {
        &self.initialize_result
    }

    async fn ping(&self) -> ProxyResult<()> {
        let _: Value = self.peer.request::<Value, _>(methods::PING, None).await?;
        Ok(())
    }

    async fn list_tools(&self) -> ProxyResult<Vec<Tool>> {
        self.list_all(methods::TOOLS_LIST, |page: ListToolsResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    async fn list_prompts(&self) -> ProxyResult<Vec<Prompt>> {
        self.list_all(methods::PROMPTS_LIST, |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    async fn list_resources(&self) -> ProxyResult<Vec<Resource>> {
        self.list_all(methods::RESOURCES_LIST, |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.peer.request(methods::TOOLS_CALL, Some(params)).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> ProxyResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.peer.request(methods::PROMPTS_GET, Some(params)).await
    }

    async fn read_resource(&self, uri: &str) -> ProxyResult<ReadResourceResult> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.peer.request(methods::RESOURCES_READ, Some(params)).await
    }

    async fn close(&self) {
        let router = self.router.lock().take();
        shutdown(&self.peer).await;
        if let Some(router) = router {
            router.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrormcp_transport::{IoTransport, TransportError, TransportFuture, TransportType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Read one request from `server` and reply with `result`.
    async fn answer(server: &IoTransport, result: Value) -> JsonRpcRequest {
        let message = server.receive().await.unwrap().unwrap();
        let JsonRpcMessage::Request(request) = message.parse().unwrap() else {
            panic!("expected a request");
        };
        let reply = JsonRpcMessage::from(JsonRpcResponse::success(result, request.id.clone()));
        server
            .send(TransportMessage::from_jsonrpc(&reply).unwrap())
            .await
            .unwrap();
        request
    }

    async fn expect_notification(server: &IoTransport) -> JsonRpcNotification {
        let message = server.receive().await.unwrap().unwrap();
        match message.parse().unwrap() {
            JsonRpcMessage::Notification(n) => n,
            other => panic!("expected a notification, got {other:?}"),
        }
    }

    fn init_result() -> Value {
        json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "upstream", "version": "1.0.0"}
        })
    }

    async fn connected() -> (ClientSession, IoTransport) {
        let (client, server) = IoTransport::pair();
        let connecting = tokio::spawn(ClientSession::connect(
            Box::new(client),
            Implementation::new("test-client", "0.0.1"),
            None,
        ));
        let init = answer(&server, init_result()).await;
        assert_eq!(init.method, methods::INITIALIZE);
        assert_eq!(expect_notification(&server).await.method, methods::INITIALIZED);
        (connecting.await.unwrap().unwrap(), server)
    }

    #[tokio::test]
    async fn handshake_records_initialize_result() {
        let (session, _server) = connected().await;
        assert_eq!(session.initialize_result().server_info.name, "upstream");
        assert!(session.initialize_result().capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn list_tools_follows_cursors() {
        let (session, server) = connected().await;
        let listing = tokio::spawn(async move { session.list_tools().await });

        let first = answer(
            &server,
            json!({"tools": [{"name": "a", "inputSchema": {"type": "object"}}], "nextCursor": "p2"}),
        )
        .await;
        assert_eq!(first.params, Some(json!({})));
        let second = answer(
            &server,
            json!({"tools": [{"name": "b", "inputSchema": {"type": "object"}}]}),
        )
        .await;
        assert_eq!(second.params, Some(json!({"cursor": "p2"})));

        let tools = listing.await.unwrap().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    /// Transport whose `connect` always fails.
    #[derive(Debug, Default)]
    struct Unreachable {
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Transport for Unreachable {
        fn transport_type(&self) -> TransportType {
            TransportType::StreamableHttp
        }

        fn connect(&self) -> TransportFuture<'_, ()> {
            Box::pin(async { Err(TransportError::ConnectionFailed("refused".into())) })
        }

        fn send(&self, _message: TransportMessage) -> TransportFuture<'_, ()> {
            Box::pin(async { Err(TransportError::Closed) })
        }

        fn receive(&self) -> TransportFuture<'_, Option<TransportMessage>> {
            Box::pin(async { Ok(None) })
        }

        fn close(&self) -> TransportFuture<'_, ()> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn failed_connect_closes_the_transport() {
        let transport = Unreachable::default();
        let closed = Arc::clone(&transport.closed);
        let result = ClientSession::connect(
            Box::new(transport),
            Implementation::new("test-client", "0.0.1"),
            None,
        )
        .await;

        assert!(matches!(result, Err(ProxyError::Transport(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cursor_cycle_is_an_error() {
        let (session, server) = connected().await;
        let listing = tokio::spawn(async move { session.list_tools().await });

        for cursor in ["p1", "p2", "p1"] {
            let tool = json!({"name": cursor, "inputSchema": {"type": "object"}});
            answer(&server, json!({"tools": [tool], "nextCursor": cursor})).await;
        }

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), listing)
            .await
            .expect("listing kept paging")
            .unwrap();
        match result {
            Err(ProxyError::CursorCycle { method, cursor }) => {
                assert_eq!(method, methods::TOOLS_LIST);
                assert_eq!(cursor, "p1");
            }
            other => panic!("expected a cursor cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_errors_are_preserved() {
        let (session, server) = connected().await;
        let calling = tokio::spawn(async move { session.call_tool("boom", None).await });

        let message = server.receive().await.unwrap().unwrap();
        let JsonRpcMessage::Request(request) = message.parse().unwrap() else {
            panic!("expected a request");
        };
        let reply = JsonRpcMessage::from(JsonRpcResponse::error(
            JsonRpcError::new(-32001, "tool exploded"),
            Some(request.id),
        ));
        server
            .send(TransportMessage::from_jsonrpc(&reply).unwrap())
            .await
            .unwrap();

        match calling.await.unwrap() {
            Err(ProxyError::Upstream(error)) => assert_eq!(error.code, -32001),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_transport_fails_outstanding_requests() {
        let (session, server) = connected().await;
        let pinging = tokio::spawn(async move { session.ping().await });
        let _ = server.receive().await.unwrap().unwrap();
        server.close().await.unwrap();
        assert!(matches!(
            pinging.await.unwrap(),
            Err(ProxyError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn notifications_reach_the_handler() {
        let (client, server) = IoTransport::pair();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler: NotificationHandler = Arc::new(move |n: JsonRpcNotification| {
            let _ = tx.send(n.method);
        });
        let connecting = tokio::spawn(ClientSession::connect(
            Box::new(client),
            Implementation::new("test-client", "0.0.1"),
            Some(handler),
        ));
        answer(&server, init_result()).await;
        expect_notification(&server).await;
        let _session = connecting.await.unwrap().unwrap();

        let changed = JsonRpcMessage::from(JsonRpcNotification::new(
            methods::TOOLS_LIST_CHANGED,
            None,
        ));
        server
            .send(TransportMessage::from_jsonrpc(&changed).unwrap())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), methods::TOOLS_LIST_CHANGED);
    }

    #[tokio::test]
    async fn upstream_ping_is_answered() {
        let (_session, server) = connected().await;
        let ping = JsonRpcMessage::from(JsonRpcRequest::new(
            methods::PING,
            None,
            MessageId::from("srv-1"),
        ));
        server
            .send(TransportMessage::from_jsonrpc(&ping).unwrap())
            .await
            .unwrap();
        let reply = server.receive().await.unwrap().unwrap();
        let JsonRpcMessage::Response(response) = reply.parse().unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.result(), Some(&json!({})));
    }
}
