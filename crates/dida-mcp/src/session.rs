use std::{fmt, time::Duration};

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    cancel::{wait_for_cancellation, SessionCancelHandle},
    endpoint::resolve_endpoint,
    pending::{PendingCall, PendingCallTable},
    poster::post_envelope,
    sse::sse_event_stream,
    CallToolParams, ClientInfo, InitializeParams, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, McpSseError, SessionStage, StreamEvent,
};

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";
const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
const STREAM_EVENT_BUFFER: usize = 64;

type StreamItem = Result<StreamEvent, McpSseError>;

#[derive(Debug, Clone)]
/// Public struct `McpSseConfig` used across dida components.
pub struct McpSseConfig {
    pub sse_url: Url,
    /// Auth headers sent on the stream request and on every POST.
    pub headers: HeaderMap,
    /// Budget shared by every awaited step of one call.
    pub timeout: Duration,
    pub protocol_version: String,
    pub client_info: ClientInfo,
}

impl McpSseConfig {
    pub fn new(sse_url: Url) -> Self {
        Self {
            sse_url,
            headers: HeaderMap::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Result<Self, McpSseError> {
        let mut value = HeaderValue::from_str(api_key.trim()).map_err(|error| {
            McpSseError::InvalidConfig(format!("invalid api key header: {error}"))
        })?;
        value.set_sensitive(true);
        self.headers
            .insert(HeaderName::from_static(HEADER_API_KEY), value);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `SessionState` values.
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingEndpoint,
    Ready,
    CallInFlight,
    Completed,
    Failed,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingEndpoint => "awaiting_endpoint",
            SessionState::Ready => "ready",
            SessionState::CallInFlight => "call_in_flight",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct CallContext {
    events: mpsc::Receiver<StreamItem>,
    cancel_rx: watch::Receiver<bool>,
    deadline: Instant,
}

/// Raises the cancellation signal if the driving future is dropped mid-call.
struct AbandonGuard {
    cancel: SessionCancelHandle,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancel.cancel();
        }
    }
}

/// One connect, negotiate, handshake, call, teardown cycle over an MCP SSE
/// transport.
///
/// A background task reads the event stream and forwards decoded events over
/// a channel; the awaiting side dispatches them into the pending-call table.
/// Teardown (cancel signal, reader abort, `reject_all`) runs exactly once,
/// whether the call succeeds, fails, is cancelled, or the session is dropped.
pub struct McpSseSession {
    http: reqwest::Client,
    config: McpSseConfig,
    headers: HeaderMap,
    state: SessionState,
    next_id: u64,
    endpoint: Option<Url>,
    pending: PendingCallTable,
    initialize_result: Option<Value>,
    cancel: SessionCancelHandle,
    cancel_rx: watch::Receiver<bool>,
    reader: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl McpSseSession {
    pub fn new(config: McpSseConfig) -> Result<Self, McpSseError> {
        let http = reqwest::Client::builder().build().map_err(|error| {
            McpSseError::InvalidConfig(format!("failed to build http client: {error}"))
        })?;
        Self::with_client(http, config)
    }

    pub fn with_client(http: reqwest::Client, config: McpSseConfig) -> Result<Self, McpSseError> {
        let mut headers = config.headers.clone();
        let version = HeaderValue::from_str(&config.protocol_version).map_err(|error| {
            McpSseError::InvalidConfig(format!("invalid protocol version header: {error}"))
        })?;
        headers.insert(HeaderName::from_static(HEADER_MCP_PROTOCOL_VERSION), version);
        let (cancel, cancel_rx) = SessionCancelHandle::new();

        Ok(Self {
            http,
            config,
            headers,
            state: SessionState::Disconnected,
            next_id: 1,
            endpoint: None,
            pending: PendingCallTable::new(),
            initialize_result: None,
            cancel,
            cancel_rx,
            reader: None,
            torn_down: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_handle(&self) -> SessionCancelHandle {
        self.cancel.clone()
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn initialize_result(&self) -> Option<&Value> {
        self.initialize_result.as_ref()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Runs the full cycle for one `tools/call` and returns its `result`.
    ///
    /// A session carries exactly one call; afterwards it is `Closed` and
    /// further calls fail with [`McpSseError::SessionClosed`].
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, McpSseError> {
        if self.state != SessionState::Disconnected {
            return Err(McpSseError::SessionClosed);
        }

        let mut guard = AbandonGuard {
            cancel: self.cancel.clone(),
            armed: true,
        };
        let outcome = self.run_call(tool_name, arguments).await;
        guard.armed = false;

        let reason = match &outcome {
            Ok(_) => {
                info!(tool = tool_name, "mcp tool call completed");
                self.transition(SessionState::Completed);
                McpSseError::SessionClosed
            }
            Err(error) => {
                warn!(
                    tool = tool_name,
                    kind = error.kind().as_str(),
                    %error,
                    "mcp tool call failed"
                );
                self.transition(SessionState::Failed);
                error.clone()
            }
        };
        self.teardown(reason);
        outcome
    }

    async fn run_call(&mut self, tool_name: &str, arguments: Value) -> Result<Value, McpSseError> {
        let deadline = Instant::now() + self.config.timeout;
        let mut cancel_rx = self.cancel_rx.clone();

        self.transition(SessionState::Connecting);
        let response = self.open_stream(deadline, &mut cancel_rx).await?;

        self.transition(SessionState::AwaitingEndpoint);
        let events = self.spawn_reader(response);
        let mut ctx = CallContext {
            events,
            cancel_rx,
            deadline,
        };
        let endpoint = self.await_endpoint(&mut ctx).await?;

        self.transition(SessionState::Ready);
        let params = serde_json::to_value(InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: json!({}),
            client_info: self.config.client_info.clone(),
        })?;
        let init = self
            .request(&mut ctx, &endpoint, "initialize", params, SessionStage::Handshake)
            .await?;
        if let Some(version) = init.get("protocolVersion").and_then(Value::as_str) {
            debug!(protocol_version = version, "mcp server initialized");
        }
        self.initialize_result = Some(init);

        let initialized = JsonRpcNotification::new("notifications/initialized", json!({}));
        self.post(&mut ctx, &endpoint, &initialized, SessionStage::Handshake)
            .await?;

        self.transition(SessionState::CallInFlight);
        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments,
        })?;
        self.request(&mut ctx, &endpoint, "tools/call", params, SessionStage::Call)
            .await
    }

    async fn open_stream(
        &self,
        deadline: Instant,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<reqwest::Response, McpSseError> {
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MIME_TYPE));
        let request = self
            .http
            .get(self.config.sse_url.clone())
            .headers(headers);

        let connect = async move {
            let response = request
                .send()
                .await
                .map_err(|error| McpSseError::Connection(error.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(McpSseError::ConnectionStatus {
                    status: status.as_u16(),
                    body,
                });
            }
            if response.content_length() == Some(0) {
                return Err(McpSseError::Connection(
                    "sse response has no body".to_string(),
                ));
            }
            Ok(response)
        };

        tokio::select! {
            biased;
            _ = wait_for_cancellation(cancel_rx) => Err(McpSseError::Cancelled),
            _ = sleep_until(deadline) => Err(self.timeout_error(SessionStage::Connecting)),
            result = connect => result,
        }
    }

    fn spawn_reader(&mut self, response: reqwest::Response) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(STREAM_EVENT_BUFFER);
        let cancel_rx = self.cancel_rx.clone();
        self.reader = Some(tokio::spawn(run_stream_reader(response, tx, cancel_rx)));
        rx
    }

    async fn await_endpoint(&mut self, ctx: &mut CallContext) -> Result<Url, McpSseError> {
        loop {
            if let Some(endpoint) = &self.endpoint {
                return Ok(endpoint.clone());
            }
            let item = tokio::select! {
                biased;
                _ = wait_for_cancellation(&mut ctx.cancel_rx) => return Err(McpSseError::Cancelled),
                _ = sleep_until(ctx.deadline) => {
                    return Err(self.timeout_error(SessionStage::AwaitingEndpoint));
                }
                item = ctx.events.recv() => item,
            };
            self.handle_stream_item(item)?;
        }
    }

    async fn request(
        &mut self,
        ctx: &mut CallContext,
        endpoint: &Url,
        method: &str,
        params: Value,
        stage: SessionStage,
    ) -> Result<Value, McpSseError> {
        let id = self.next_request_id();
        let call = self.pending.register(id);
        let request = JsonRpcRequest::new(id, method, params);
        debug!(id, method, "sending json-rpc request");
        self.post(ctx, endpoint, &request, stage).await?;

        self.await_response(ctx, call, stage)
            .await
            .map_err(|error| match error {
                McpSseError::Remote(remote) if stage == SessionStage::Handshake => {
                    McpSseError::Handshake(remote)
                }
                McpSseError::Remote(remote) => McpSseError::Call(remote),
                other => other,
            })
    }

    async fn post<T: Serialize>(
        &self,
        ctx: &mut CallContext,
        endpoint: &Url,
        envelope: &T,
        stage: SessionStage,
    ) -> Result<(), McpSseError> {
        tokio::select! {
            biased;
            _ = sleep_until(ctx.deadline) => Err(self.timeout_error(stage)),
            result = post_envelope(&self.http, endpoint, envelope, &self.headers, &mut ctx.cancel_rx) => result,
        }
    }

    async fn await_response(
        &mut self,
        ctx: &mut CallContext,
        mut call: PendingCall,
        stage: SessionStage,
    ) -> Result<Value, McpSseError> {
        loop {
            let item = tokio::select! {
                biased;
                outcome = &mut call => return outcome,
                _ = wait_for_cancellation(&mut ctx.cancel_rx) => return Err(McpSseError::Cancelled),
                _ = sleep_until(ctx.deadline) => return Err(self.timeout_error(stage)),
                item = ctx.events.recv() => item,
            };
            if let Err(error) = self.handle_stream_item(item) {
                self.pending.reject_all(error.clone());
                return Err(error);
            }
        }
    }

    fn handle_stream_item(&mut self, item: Option<StreamItem>) -> Result<(), McpSseError> {
        match item {
            Some(Ok(event)) => self.dispatch_event(event),
            Some(Err(error)) => Err(error),
            None => Err(McpSseError::StreamClosed),
        }
    }

    fn dispatch_event(&mut self, event: StreamEvent) -> Result<(), McpSseError> {
        if event.is_endpoint() {
            if self.endpoint.is_some() {
                debug!(payload = %event.data, "ignoring repeated endpoint event");
                return Ok(());
            }
            let endpoint = resolve_endpoint(&event.data, &self.config.sse_url)?;
            debug!(%endpoint, "resolved mcp message endpoint");
            self.endpoint = Some(endpoint);
            return Ok(());
        }
        if event.is_message() {
            self.dispatch_message(&event.data);
            return Ok(());
        }
        debug!(event_type = %event.event_type, "ignoring sse event");
        Ok(())
    }

    fn dispatch_message(&self, data: &str) {
        let value = match serde_json::from_str::<Value>(data) {
            Ok(value) if value.is_object() => value,
            Ok(_) => {
                let error = McpSseError::FrameParse("payload is not a JSON object".to_string());
                warn!(%error, "ignoring message frame");
                return;
            }
            Err(parse_error) => {
                let error = McpSseError::FrameParse(parse_error.to_string());
                warn!(%error, "ignoring message frame");
                return;
            }
        };
        if value.get("method").is_some() {
            debug!("ignoring server-initiated json-rpc message");
            return;
        }
        let response = JsonRpcResponse::from_value(&value);
        let Some(id) = response.id.as_u64() else {
            debug!(id = %response.id, "ignoring response without a numeric id");
            return;
        };

        let matched = match response.error {
            Some(error) => self.pending.reject(id, McpSseError::Remote(error)),
            None => self
                .pending
                .resolve(id, response.result.unwrap_or(Value::Null)),
        };
        if !matched {
            debug!(id, "ignoring response for unknown request id");
        }
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn timeout_error(&self, stage: SessionStage) -> McpSseError {
        McpSseError::Timeout {
            stage,
            timeout_ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "mcp sse session state");
        self.state = next;
    }

    fn teardown(&mut self, reason: McpSseError) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let drained = self.pending.reject_all(reason);
        if drained > 0 {
            debug!(drained, "rejected pending calls during teardown");
        }
        self.transition(SessionState::Closed);
    }
}

impl Drop for McpSseSession {
    fn drop(&mut self) {
        self.teardown(McpSseError::Cancelled);
    }
}

/// Opens a session, performs one `tools/call`, and tears the session down.
pub async fn call_tool_over_sse(
    config: McpSseConfig,
    tool_name: &str,
    arguments: Value,
) -> Result<Value, McpSseError> {
    let mut session = McpSseSession::new(config)?;
    session.call_tool(tool_name, arguments).await
}

async fn run_stream_reader(
    response: reqwest::Response,
    tx: mpsc::Sender<StreamItem>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let events = sse_event_stream(response.bytes_stream());
    tokio::pin!(events);

    loop {
        let item = tokio::select! {
            biased;
            _ = wait_for_cancellation(&mut cancel_rx) => {
                debug!("sse reader cancelled");
                return;
            }
            item = events.next() => item,
        };
        let Some(item) = item else {
            debug!("sse stream ended");
            return;
        };
        let fatal = item.is_err();
        tokio::select! {
            biased;
            _ = wait_for_cancellation(&mut cancel_rx) => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        if fatal {
            return;
        }
    }
}
