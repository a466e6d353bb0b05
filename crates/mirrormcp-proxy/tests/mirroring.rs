//! The proxy end to end: a downstream client talks to the local server over
//! an in-memory pipe while the upstream changes underneath it.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{
    LoopbackConnector, ScriptedConnector, ScriptedState, WAIT, downstream, eventually,
    expect_notification, fast_backoff, loopback_upstream, names,
};
use mirrormcp_protocol::{
    JsonRpcErrorCode, JsonRpcMessage, PromptMessage, ResourceContents, Role, Tool,
};
use mirrormcp_proxy::config::SERVER_NAME;
use mirrormcp_proxy::{
    CapabilityKind, Connector, HandlerSink, Proxy, ProxyError, ProxyOptions, ProxyResult,
    ResyncPolicy, UpstreamSession,
};
use mirrormcp_transport::{IoTransport, Transport, TransportMessage};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

fn options(resync_policy: ResyncPolicy) -> ProxyOptions {
    ProxyOptions {
        backoff: fast_backoff(),
        resync_policy,
        ..ProxyOptions::default()
    }
}

/// Start `proxy` on one end of a pipe and return the other end.
fn start<C: Connector>(proxy: &Arc<Proxy<C>>) -> (IoTransport, JoinHandle<ProxyResult<()>>) {
    let (client_end, server_end) = IoTransport::pair();
    let proxy = Arc::clone(proxy);
    let running = tokio::spawn(async move { proxy.run(Box::new(server_end)).await });
    (client_end, running)
}

async fn finish(running: JoinHandle<ProxyResult<()>>) -> ProxyResult<()> {
    tokio::time::timeout(WAIT, running)
        .await
        .expect("proxy did not stop")
        .expect("proxy task panicked")
}

fn arguments(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[tokio::test]
async fn mirrors_the_upstream_and_forwards_invocations() {
    let upstream = loopback_upstream();
    let proxy = Arc::new(Proxy::with_connector(
        LoopbackConnector::new(Arc::clone(&upstream)),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    let (client, _changes) = downstream(client_end).await;

    let init = client.initialize_result();
    assert_eq!(init.server_info.name, SERVER_NAME);
    assert_eq!(init.instructions.as_deref(), Some("Use echo for testing."));
    assert_eq!(init.capabilities.tools.as_ref().unwrap().list_changed, Some(true));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(names(&tools), vec!["add", "echo", "quota"]);
    let prompts = client.list_prompts().await.unwrap();
    assert_eq!(prompts.len(), 2);
    let resources = client.list_resources().await.unwrap();
    assert_eq!(resources[0].uri, "file:///config.json");

    let sum = client
        .call_tool("add", arguments(json!({"a": 2, "b": 3.5})))
        .await
        .unwrap();
    assert_eq!(sum.first_text(), Some("sum: 5.5"));

    let echoed = client
        .call_tool("echo", arguments(json!({"message": "hi"})))
        .await
        .unwrap();
    assert_eq!(echoed.first_text(), Some("echo: hi"));

    let greeting = client
        .get_prompt(
            "greet",
            Some([("name".to_string(), "Ada".to_string())].into_iter().collect()),
        )
        .await
        .unwrap();
    assert_eq!(
        greeting.messages,
        vec![PromptMessage::text(Role::User, "Hello, Ada!")]
    );

    let config = client.read_resource("file:///config.json").await.unwrap();
    assert_eq!(
        config.contents,
        vec![ResourceContents::text(
            "file:///config.json",
            Some("application/json"),
            r#"{"debug":true}"#
        )]
    );

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
    proxy.close().await;
}

#[tokio::test]
async fn upstream_errors_reach_the_client_unchanged() {
    let upstream = loopback_upstream();
    let proxy = Arc::new(Proxy::with_connector(
        LoopbackConnector::new(upstream),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    let (client, _changes) = downstream(client_end).await;

    match client.call_tool("quota", None).await {
        Err(ProxyError::Upstream(error)) => {
            assert_eq!(error.code, -32001);
            assert_eq!(error.message, "quota exceeded");
        }
        other => panic!("expected the upstream error, got {other:?}"),
    }

    match client.read_resource("file:///missing.txt").await {
        Err(ProxyError::Upstream(error)) => {
            assert_eq!(error.code, JsonRpcErrorCode::ResourceNotFound.code());
        }
        other => panic!("expected resource not found, got {other:?}"),
    }

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
}

#[tokio::test]
async fn upstream_list_changes_are_mirrored_and_announced() {
    let upstream = loopback_upstream();
    let proxy = Arc::new(Proxy::with_connector(
        LoopbackConnector::new(Arc::clone(&upstream)),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    let (client, mut changes) = downstream(client_end).await;
    let tools_changed = CapabilityKind::Tools.list_changed_method();

    upstream.add_handler(Tool::new("time", "Current time"));
    expect_notification(&mut changes, tools_changed).await;
    let tools = client.list_tools().await.unwrap();
    assert_eq!(names(&tools), vec!["add", "echo", "quota", "time"]);

    upstream.remove_handlers::<Tool>(&["echo".to_string()]);
    expect_notification(&mut changes, tools_changed).await;
    let tools = client.list_tools().await.unwrap();
    assert_eq!(names(&tools), vec!["add", "quota", "time"]);

    match client.call_tool("echo", None).await {
        Err(ProxyError::Upstream(error)) => {
            assert_eq!(error.code, JsonRpcErrorCode::InvalidParams.code());
            assert!(error.message.contains("Unknown tool"));
        }
        other => panic!("expected an unknown tool error, got {other:?}"),
    }

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
}

#[tokio::test]
async fn undecodable_tool_arguments_never_reach_the_upstream() {
    let state = ScriptedState::new();
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(Arc::clone(&state)),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    client_end.connect().await.unwrap();

    client_end
        .send(TransportMessage::new(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo","arguments":"oops"}}"#,
        ))
        .await
        .unwrap();
    let reply = tokio::time::timeout(WAIT, client_end.receive())
        .await
        .expect("no reply")
        .unwrap()
        .unwrap();

    let JsonRpcMessage::Response(response) = reply.parse().unwrap() else {
        panic!("expected a response");
    };
    let error = response.error_object().unwrap();
    assert_eq!(error.code, JsonRpcErrorCode::InvalidParams.code());
    assert!(state.behavior.calls.lock().is_empty());

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_fails_startup() {
    let state = ScriptedState::new();
    state.unavailable.store(true, Ordering::SeqCst);
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(Arc::clone(&state)),
        options(ResyncPolicy::Exit),
    ));
    let (_client_end, running) = start(&proxy);

    let result = finish(running).await;

    assert!(matches!(result, Err(ProxyError::Connection { .. })));
    assert!(proxy.local_server().is_none());
}

#[tokio::test]
async fn failed_resync_stops_the_proxy_under_exit_policy() {
    let state = ScriptedState::new();
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(Arc::clone(&state)),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    let (_client, _changes) = downstream(client_end).await;

    state.fail_lists.store(true, Ordering::SeqCst);
    state.notify(CapabilityKind::Tools);

    match finish(running).await {
        Err(ProxyError::Resync { kind, .. }) => assert_eq!(kind, CapabilityKind::Tools),
        other => panic!("expected a resync failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_resync_keeps_serving_under_degrade_policy() {
    let state = ScriptedState::new();
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(Arc::clone(&state)),
        options(ResyncPolicy::Degrade),
    ));
    let (client_end, running) = start(&proxy);
    let (client, mut changes) = downstream(client_end).await;

    state.fail_lists.store(true, Ordering::SeqCst);
    state.notify(CapabilityKind::Tools);
    eventually(|| proxy.is_mirror_stale()).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(names(&tools), vec!["add", "echo"]);

    state.fail_lists.store(false, Ordering::SeqCst);
    *state.tools.lock() = vec![common::add_tool()];
    state.notify(CapabilityKind::Tools);
    expect_notification(&mut changes, CapabilityKind::Tools.list_changed_method()).await;
    let tools = client.list_tools().await.unwrap();
    assert_eq!(names(&tools), vec!["add"]);

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
}

#[tokio::test]
async fn calls_survive_an_upstream_restart() {
    let state = ScriptedState::new();
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(Arc::clone(&state)),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    let (client, _changes) = downstream(client_end).await;

    state.restart();
    let echoed = client
        .call_tool("echo", arguments(json!({"message": "again"})))
        .await
        .unwrap();

    assert_eq!(echoed.first_text(), Some("echo: again"));
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);

    proxy.shutdown_token().cancel();
    finish(running).await.unwrap();
}

#[tokio::test]
async fn a_proxy_runs_only_once() {
    let state = ScriptedState::new();
    let proxy = Arc::new(Proxy::with_connector(
        ScriptedConnector::new(state),
        options(ResyncPolicy::Exit),
    ));
    let (client_end, running) = start(&proxy);
    drop(client_end);
    finish(running).await.unwrap();

    let (_client_end, again) = start(&proxy);
    assert!(matches!(
        finish(again).await,
        Err(ProxyError::Configuration { .. })
    ));
}
