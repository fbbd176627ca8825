use std::fmt::Display;
use std::future::Future;

use dida_mcp::McpSseSession;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    find_bridge_tool, normalize_bridge_arguments, validate_bridge_arguments, BridgeConfig,
};

pub const BRIDGE_ERROR_PREFIX: &str = "MCP call failed";
pub const BRIDGE_ERROR_UNKNOWN_TOOL: &str = "unknown_tool";
pub const BRIDGE_ERROR_INVALID_ARGUMENTS: &str = "invalid_arguments";
pub const BRIDGE_ERROR_INVALID_CONFIG: &str = "invalid_config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `BridgeContentBlock` used across dida components.
pub struct BridgeContentBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Result handed back to the agent host for one tool invocation.
pub struct BridgeToolOutput {
    #[serde(rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
    pub content: Vec<BridgeContentBlock>,
    #[serde(skip)]
    pub error_kind: Option<&'static str>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BridgeToolOutput {
    pub fn success(result: &Value) -> Self {
        let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        Self {
            is_error: false,
            content: vec![BridgeContentBlock { kind: "text", text }],
            error_kind: None,
        }
    }

    pub fn failure(message: impl Display, error_kind: &'static str) -> Self {
        Self {
            is_error: true,
            content: vec![BridgeContentBlock {
                kind: "text",
                text: format!("{BRIDGE_ERROR_PREFIX}: {message}"),
            }],
            error_kind: Some(error_kind),
        }
    }

    pub fn text(&self) -> &str {
        self.content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default()
    }
}

pub async fn execute_bridge_tool(
    config: &BridgeConfig,
    tool_name: &str,
    arguments: Option<Value>,
) -> BridgeToolOutput {
    execute_bridge_tool_until(config, tool_name, arguments, std::future::pending()).await
}

/// Like [`execute_bridge_tool`], but cancels the session once `shutdown`
/// completes. The cancelled call still yields a formatted error output.
pub async fn execute_bridge_tool_until<F>(
    config: &BridgeConfig,
    tool_name: &str,
    arguments: Option<Value>,
    shutdown: F,
) -> BridgeToolOutput
where
    F: Future<Output = ()>,
{
    let Some(tool) = find_bridge_tool(tool_name) else {
        return BridgeToolOutput::failure(
            format!("unknown tool '{}'", tool_name.trim()),
            BRIDGE_ERROR_UNKNOWN_TOOL,
        );
    };
    let arguments = normalize_bridge_arguments(arguments);
    if let Err(error) = validate_bridge_arguments(&tool, &arguments) {
        return BridgeToolOutput::failure(error, BRIDGE_ERROR_INVALID_ARGUMENTS);
    }

    let session = config
        .session_config()
        .and_then(|session_config| McpSseSession::new(session_config).map_err(Into::into));
    let mut session = match session {
        Ok(session) => session,
        Err(error) => {
            return BridgeToolOutput::failure(format!("{error:#}"), BRIDGE_ERROR_INVALID_CONFIG)
        }
    };

    debug!(tool = tool.name, remote_tool = tool.remote_tool, "executing bridge tool");
    let cancel = session.cancel_handle();
    let call = session.call_tool(tool.remote_tool, arguments);
    tokio::pin!(call);
    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        outcome = &mut call => outcome,
        _ = &mut shutdown => {
            debug!(tool = tool.name, "shutdown requested, cancelling mcp session");
            cancel.cancel();
            call.await
        }
    };

    match outcome {
        Ok(result) => BridgeToolOutput::success(&result),
        Err(error) => {
            let kind = error.kind().as_str();
            warn!(tool = tool.name, kind, %error, "bridge tool failed");
            BridgeToolOutput::failure(error, kind)
        }
    }
}
