use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dida_mcp::{
    call_tool_over_sse, McpSseConfig, McpSseError, McpSseErrorKind, McpSseSession, SessionStage,
    SessionState,
};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

const API_KEY: &str = "secret";
const ENDPOINT_PAYLOAD: &str = "/msg?session=abc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolBehavior {
    Succeed,
    Fail,
    FailWithBareString,
    RejectPost,
    Silent,
    CloseStream,
}

struct StreamDropCounter(Arc<AtomicUsize>);

impl Drop for StreamDropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeMcpServer {
    endpoint_payload: Option<&'static str>,
    fail_initialize: bool,
    tool_behavior: ToolBehavior,
    streams: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    posts: Mutex<Vec<RecordedPost>>,
    stream_drops: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct RecordedPost {
    uri: String,
    protocol_version: Option<String>,
    body: Value,
}

impl FakeMcpServer {
    fn new(announce_endpoint: bool, tool_behavior: ToolBehavior) -> Arc<Self> {
        Self::configured(
            announce_endpoint.then_some(ENDPOINT_PAYLOAD),
            false,
            tool_behavior,
        )
    }

    fn configured(
        endpoint_payload: Option<&'static str>,
        fail_initialize: bool,
        tool_behavior: ToolBehavior,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint_payload,
            fail_initialize,
            tool_behavior,
            streams: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            stream_drops: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn push(&self, event: Event) {
        for stream in self.streams.lock().expect("streams lock").iter() {
            let _ = stream.send(event.clone());
        }
    }

    fn push_message(&self, payload: Value) {
        self.push(Event::default().event("message").data(payload.to_string()));
    }

    fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().expect("posts lock").clone()
    }

    fn post_methods(&self) -> Vec<String> {
        self.posts()
            .iter()
            .map(|post| post.body["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

async fn handle_stream(State(server): State<Arc<FakeMcpServer>>, headers: HeaderMap) -> Response {
    let key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if key != Some(API_KEY) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(payload) = server.endpoint_payload {
        let _ = tx.send(Event::default().event("endpoint").data(payload));
        let _ = tx.send(Event::default().event("endpoint").data("/ignored"));
    }
    server.streams.lock().expect("streams lock").push(tx);

    let guard = StreamDropCounter(Arc::clone(&server.stream_drops));
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok::<Event, Infallible>(event)
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_millis(25)))
        .into_response()
}

async fn handle_message(
    State(server): State<Arc<FakeMcpServer>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    server.posts.lock().expect("posts lock").push(RecordedPost {
        uri: uri.to_string(),
        protocol_version: headers
            .get("mcp-protocol-version")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: body.clone(),
    });

    let id = body["id"].clone();
    match body["method"].as_str() {
        Some("initialize") if server.fail_initialize => server.push_message(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": "unsupported protocol version"}
        })),
        Some("initialize") => {
            server.push(Event::default().event("message").data("not json"));
            server.push_message(json!({"jsonrpc": "2.0", "id": 99, "result": {}}));
            server.push_message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake-dida", "version": "0.0.1"}
                }
            }));
        }
        Some("tools/call") => match server.tool_behavior {
            ToolBehavior::Succeed => server.push_message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": "3 tasks"}],
                    "echo": body["params"].clone()
                }
            })),
            ToolBehavior::Fail => server.push_message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": "boom"}
            })),
            ToolBehavior::FailWithBareString => server.push_message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": "boom"
            })),
            ToolBehavior::RejectPost => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "storage offline").into_response();
            }
            ToolBehavior::Silent => {}
            ToolBehavior::CloseStream => server.streams.lock().expect("streams lock").clear(),
        },
        _ => {}
    }
    StatusCode::ACCEPTED.into_response()
}

async fn spawn_fake_server(server: Arc<FakeMcpServer>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let app = Router::new()
        .route("/sse", get(handle_stream))
        .route("/msg", post(handle_message))
        .with_state(server);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, handle)
}

fn session_config(addr: SocketAddr, api_key: &str, timeout: Duration) -> McpSseConfig {
    McpSseConfig::new(Url::parse(&format!("http://{addr}/sse")).expect("sse url"))
        .with_api_key(api_key)
        .expect("api key header")
        .with_timeout(timeout)
}

async fn wait_for_stream_drop(server: &FakeMcpServer) -> bool {
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(3) {
        if server.stream_drops.load(Ordering::SeqCst) > 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn integration_tool_call_round_trip_returns_result_and_closes_session() {
    let server = FakeMcpServer::new(true, ToolBehavior::Succeed);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let mut session =
        McpSseSession::new(session_config(addr, API_KEY, Duration::from_secs(5))).expect("session");
    let result = session
        .call_tool("get_tasks", json!({"project": "inbox"}))
        .await
        .expect("tool call should succeed");

    assert_eq!(result["content"][0]["text"], "3 tasks");
    assert_eq!(
        result["echo"],
        json!({"name": "get_tasks", "arguments": {"project": "inbox"}})
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.pending_calls(), 0);
    assert_eq!(
        session
            .initialize_result()
            .and_then(|value| value["serverInfo"]["name"].as_str()),
        Some("fake-dida")
    );

    assert_eq!(
        server.post_methods(),
        vec!["initialize", "notifications/initialized", "tools/call"]
    );
    let posts = server.posts();
    assert!(posts.iter().all(|post| post.uri == "/msg?session=abc"));
    assert!(posts
        .iter()
        .all(|post| post.protocol_version.as_deref() == Some("2024-11-05")));
    assert_eq!(posts[0].body["id"], 1);
    assert_eq!(posts[0].body["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(posts[0].body["params"]["clientInfo"]["name"], "dida-mcp");
    assert!(posts[1].body.get("id").is_none());
    assert_eq!(posts[2].body["id"], 2);

    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}

#[tokio::test]
async fn integration_remote_tool_error_surfaces_as_call_error() {
    let server = FakeMcpServer::new(true, ToolBehavior::Fail);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(5)),
        "create_task",
        json!({"title": "write report"}),
    )
    .await
    .expect_err("remote error should fail the call");

    assert_eq!(error.kind(), McpSseErrorKind::Call);
    assert_eq!(error.remote_message(), Some("boom"));
    assert!(error.to_string().contains("boom"));
    handle.abort();
}

#[tokio::test]
async fn integration_missing_endpoint_times_out_without_posting() {
    let server = FakeMcpServer::new(false, ToolBehavior::Succeed);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let started = Instant::now();
    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_millis(300)),
        "get_tasks",
        json!({}),
    )
    .await
    .expect_err("no endpoint event should time out");

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        error,
        McpSseError::Timeout {
            stage: SessionStage::AwaitingEndpoint,
            timeout_ms: 300,
        }
    );
    assert!(server.posts().is_empty());
    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}

#[tokio::test]
async fn integration_unanswered_tool_call_times_out_in_call_stage() {
    let server = FakeMcpServer::new(true, ToolBehavior::Silent);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_millis(500)),
        "get_projects",
        json!({}),
    )
    .await
    .expect_err("silent server should time out");

    assert!(error.is_timeout());
    assert_eq!(error.kind(), McpSseErrorKind::Call);
    handle.abort();
}

#[tokio::test]
async fn integration_stream_close_with_pending_call_fails_fast() {
    let server = FakeMcpServer::new(true, ToolBehavior::CloseStream);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let started = Instant::now();
    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(10)),
        "delete_task",
        json!({"task_id_or_title": "old"}),
    )
    .await
    .expect_err("closed stream should fail the call");

    assert_eq!(error, McpSseError::StreamClosed);
    assert!(started.elapsed() < Duration::from_secs(5));
    handle.abort();
}

#[tokio::test]
async fn integration_external_cancellation_aborts_pending_call() {
    let server = FakeMcpServer::new(true, ToolBehavior::Silent);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let mut session = McpSseSession::new(session_config(addr, API_KEY, Duration::from_secs(10)))
        .expect("session");
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let error = session
        .call_tool("get_tasks", json!({}))
        .await
        .expect_err("cancelled call");

    assert_eq!(error, McpSseError::Cancelled);
    assert_eq!(error.kind(), McpSseErrorKind::Cancellation);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}

#[tokio::test]
async fn integration_rejected_api_key_is_a_connection_failure() {
    let server = FakeMcpServer::new(true, ToolBehavior::Succeed);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let error = call_tool_over_sse(
        session_config(addr, "wrong", Duration::from_secs(5)),
        "get_tasks",
        json!({}),
    )
    .await
    .expect_err("bad key");

    assert_eq!(
        error,
        McpSseError::ConnectionStatus {
            status: 401,
            body: "invalid api key".to_string(),
        }
    );
    assert_eq!(error.kind(), McpSseErrorKind::Connection);
    handle.abort();
}

#[tokio::test]
async fn regression_bare_string_error_fails_call_without_waiting_for_deadline() {
    let server = FakeMcpServer::new(true, ToolBehavior::FailWithBareString);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let started = Instant::now();
    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(10)),
        "get_tasks",
        json!({}),
    )
    .await
    .expect_err("string error member should fail the call");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(error, McpSseError::Call(_)), "{error:?}");
    assert_eq!(error.kind(), McpSseErrorKind::Call);
    assert_eq!(error.remote_message(), Some("boom"));
    handle.abort();
}

#[tokio::test]
async fn integration_initialize_error_is_a_handshake_failure() {
    let server = FakeMcpServer::configured(Some(ENDPOINT_PAYLOAD), true, ToolBehavior::Succeed);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(5)),
        "get_tasks",
        json!({}),
    )
    .await
    .expect_err("initialize error should fail the handshake");

    assert!(matches!(error, McpSseError::Handshake(_)), "{error:?}");
    assert_eq!(error.kind(), McpSseErrorKind::Handshake);
    assert_eq!(error.remote_message(), Some("unsupported protocol version"));
    assert_eq!(server.post_methods(), vec!["initialize"]);
    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}

#[tokio::test]
async fn integration_rejected_tool_post_surfaces_transport_status_and_closes_stream() {
    let server = FakeMcpServer::new(true, ToolBehavior::RejectPost);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(5)),
        "create_task",
        json!({"title": "write report"}),
    )
    .await
    .expect_err("500 on the message endpoint should fail the call");

    assert_eq!(
        error,
        McpSseError::TransportStatus {
            status: 500,
            body: "storage offline".to_string(),
        }
    );
    assert_eq!(error.kind(), McpSseErrorKind::Transport);
    assert_eq!(
        server.post_methods(),
        vec!["initialize", "notifications/initialized", "tools/call"]
    );
    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}

#[tokio::test]
async fn integration_unresolvable_endpoint_is_fatal_without_posting() {
    let server = FakeMcpServer::configured(Some("http://[::1"), false, ToolBehavior::Succeed);
    let (addr, handle) = spawn_fake_server(Arc::clone(&server)).await;

    let started = Instant::now();
    let error = call_tool_over_sse(
        session_config(addr, API_KEY, Duration::from_secs(5)),
        "get_tasks",
        json!({}),
    )
    .await
    .expect_err("bad endpoint payload should fail the session");

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(
        matches!(error, McpSseError::EndpointResolution { .. }),
        "{error:?}"
    );
    assert_eq!(error.kind(), McpSseErrorKind::EndpointResolution);
    assert!(server.posts().is_empty());
    assert!(wait_for_stream_drop(&server).await);
    handle.abort();
}
