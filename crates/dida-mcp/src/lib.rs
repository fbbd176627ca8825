//! JSON-RPC client for MCP servers that speak the HTTP+SSE transport.
//!
//! A session opens the event stream, waits for the `endpoint` event, runs the
//! `initialize` handshake, issues one `tools/call`, and tears everything down.
mod cancel;
mod endpoint;
mod pending;
mod poster;
mod session;
mod sse;
mod types;

pub use cancel::SessionCancelHandle;
pub use endpoint::resolve_endpoint;
pub use pending::{PendingCall, PendingCallTable};
pub use poster::post_envelope;
pub use reqwest::Url;
pub use session::{
    call_tool_over_sse, McpSseConfig, McpSseSession, SessionState, DEFAULT_PROTOCOL_VERSION,
    DEFAULT_TIMEOUT_MS, HEADER_API_KEY, HEADER_MCP_PROTOCOL_VERSION,
};
pub use sse::{parse_sse_record, sse_event_stream, SseFrameDecoder};
pub use types::{
    CallToolParams, ClientInfo, InitializeParams, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, McpSseError, McpSseErrorKind, SessionStage, StreamEvent,
    DEFAULT_EVENT_TYPE, JSONRPC_VERSION,
};
