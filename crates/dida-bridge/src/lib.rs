//! Agent-facing tool surface for the Dida to-do MCP server.
//!
//! Each catalog tool validates its arguments, runs one `tools/call` through
//! `dida-mcp`, and formats the outcome as a text content block.
mod catalog;
mod cli_args;
mod config;
mod tool_execution;

pub use catalog::{
    bridge_tool_catalog, find_bridge_tool, normalize_bridge_arguments, validate_bridge_arguments,
    BridgeToolDefinition,
};
pub use cli_args::{Cli, CliCommand};
pub use config::{
    normalize_timeout_ms, BridgeConfig, BridgeConfigOverrides, BRIDGE_CLIENT_NAME,
    BRIDGE_CONFIG_SCHEMA_VERSION, DEFAULT_SSE_URL, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
pub use tool_execution::{
    execute_bridge_tool, execute_bridge_tool_until, BridgeContentBlock, BridgeToolOutput,
    BRIDGE_ERROR_INVALID_ARGUMENTS, BRIDGE_ERROR_INVALID_CONFIG, BRIDGE_ERROR_PREFIX,
    BRIDGE_ERROR_UNKNOWN_TOOL,
};
