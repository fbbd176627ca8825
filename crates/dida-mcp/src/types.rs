use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Event type assumed when a record carries no `event:` line.
pub const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
/// One framed record decoded from a `text/event-stream` body.
pub struct StreamEvent {
    pub event_type: String,
    pub data: String,
}

impl StreamEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    pub fn is_endpoint(&self) -> bool {
        self.event_type == "endpoint"
    }

    pub fn is_message(&self) -> bool {
        self.event_type == DEFAULT_EVENT_TYPE
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Public struct `JsonRpcRequest` used across dida components.
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Public struct `JsonRpcNotification` used across dida components.
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Error object carried by a JSON-RPC response.
pub struct JsonRpcError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default = "default_remote_error_message")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_remote_error_message() -> String {
    "remote returned an error without a message".to_string()
}

impl JsonRpcError {
    /// Reads any non-null `error` member. Objects keep `code` and `data` only
    /// when well-typed; a bare string becomes the message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(object) => Self {
                code: object.get("code").and_then(Value::as_i64),
                message: object
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|message| !message.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(default_remote_error_message),
                data: object.get("data").filter(|data| !data.is_null()).cloned(),
            },
            Value::String(message) if !message.trim().is_empty() => Self {
                code: None,
                message: message.clone(),
                data: None,
            },
            _ => Self {
                code: None,
                message: default_remote_error_message(),
                data: None,
            },
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code={code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// Incoming JSON-RPC response envelope. `id` stays raw so non-numeric ids can be ignored.
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a response from a parsed envelope; an `error` of any shape wins
    /// over `result`.
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: value.get("id").cloned().unwrap_or(Value::Null),
            result: value.get("result").cloned(),
            error: value
                .get("error")
                .filter(|error| !error.is_null())
                .map(JsonRpcError::from_value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ClientInfo` used across dida components.
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Awaited step of a session; used to label timeouts.
pub enum SessionStage {
    Connecting,
    AwaitingEndpoint,
    Handshake,
    Call,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStage::Connecting => "opening the event stream",
            SessionStage::AwaitingEndpoint => "waiting for the endpoint event",
            SessionStage::Handshake => "waiting for the initialize response",
            SessionStage::Call => "waiting for the tools/call response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `McpSseErrorKind` values.
pub enum McpSseErrorKind {
    Connection,
    EndpointResolution,
    Handshake,
    Call,
    Transport,
    FrameParse,
    Cancellation,
}

impl McpSseErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            McpSseErrorKind::Connection => "connection_error",
            McpSseErrorKind::EndpointResolution => "endpoint_resolution_error",
            McpSseErrorKind::Handshake => "handshake_error",
            McpSseErrorKind::Call => "call_error",
            McpSseErrorKind::Transport => "transport_error",
            McpSseErrorKind::FrameParse => "frame_parse_error",
            McpSseErrorKind::Cancellation => "cancellation",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
/// Enumerates supported `McpSseError` values.
pub enum McpSseError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("sse connection failed: {0}")]
    Connection(String),
    #[error("sse connection returned non-success status {status}: {body}")]
    ConnectionStatus { status: u16, body: String },
    #[error("sse stream read failed: {0}")]
    Stream(String),
    #[error("sse stream closed by server")]
    StreamClosed,
    #[error("failed to resolve endpoint from '{payload}': {reason}")]
    EndpointResolution { payload: String, reason: String },
    #[error("timed out after {timeout_ms}ms while {stage}")]
    Timeout { stage: SessionStage, timeout_ms: u64 },
    #[error("json-rpc error: {0}")]
    Remote(JsonRpcError),
    #[error("initialize handshake failed: {0}")]
    Handshake(JsonRpcError),
    #[error("tools/call failed: {0}")]
    Call(JsonRpcError),
    #[error("mcp request failed with status {status}: {body}")]
    TransportStatus { status: u16, body: String },
    #[error("mcp request failed: {0}")]
    Transport(String),
    #[error("malformed message frame: {0}")]
    FrameParse(String),
    #[error("session cancelled")]
    Cancelled,
    #[error("session already closed")]
    SessionClosed,
    #[error("serialization error: {0}")]
    Serde(String),
}

impl McpSseError {
    pub fn kind(&self) -> McpSseErrorKind {
        match self {
            McpSseError::InvalidConfig(_)
            | McpSseError::Connection(_)
            | McpSseError::ConnectionStatus { .. }
            | McpSseError::Stream(_)
            | McpSseError::StreamClosed => McpSseErrorKind::Connection,
            McpSseError::EndpointResolution { .. } => McpSseErrorKind::EndpointResolution,
            McpSseError::Timeout { stage, .. } => match stage {
                SessionStage::Connecting => McpSseErrorKind::Connection,
                SessionStage::AwaitingEndpoint => McpSseErrorKind::EndpointResolution,
                SessionStage::Handshake => McpSseErrorKind::Handshake,
                SessionStage::Call => McpSseErrorKind::Call,
            },
            McpSseError::Handshake(_) => McpSseErrorKind::Handshake,
            McpSseError::Remote(_) | McpSseError::Call(_) => McpSseErrorKind::Call,
            McpSseError::TransportStatus { .. }
            | McpSseError::Transport(_)
            | McpSseError::Serde(_) => McpSseErrorKind::Transport,
            McpSseError::FrameParse(_) => McpSseErrorKind::FrameParse,
            McpSseError::Cancelled | McpSseError::SessionClosed => McpSseErrorKind::Cancellation,
        }
    }

    /// Message supplied by the remote peer, when the failure came from a JSON-RPC error.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            McpSseError::Remote(error) | McpSseError::Handshake(error) | McpSseError::Call(error) => {
                Some(error.message.as_str())
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, McpSseError::Timeout { .. })
    }
}

impl From<serde_json::Error> for McpSseError {
    fn from(error: serde_json::Error) -> Self {
        McpSseError::Serde(error.to_string())
    }
}
