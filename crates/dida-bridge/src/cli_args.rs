use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::BridgeConfigOverrides;

fn parse_json_arguments(value: &str) -> Result<Value, String> {
    let parsed = serde_json::from_str::<Value>(value)
        .map_err(|error| format!("failed to parse JSON arguments: {error}"))?;
    if !(parsed.is_object() || parsed.is_null()) {
        return Err("arguments must be a JSON object".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "dida-bridge",
    about = "Call Dida to-do MCP tools over the HTTP+SSE transport",
    version
)]
/// Public struct `Cli` used across dida components.
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "DIDA_MCP_CONFIG",
        help = "Optional JSON config file ({\"schema_version\":1,...}); flags and environment override its fields"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "sse-url",
        global = true,
        env = "DIDA_MCP_SSE_URL",
        help = "MCP event stream URL (default http://127.0.0.1:3000/sse)"
    )]
    pub sse_url: Option<String>,

    #[arg(
        long = "api-key",
        global = true,
        env = "DIDA_MCP_API_KEY",
        hide_env_values = true,
        help = "API key sent as x-api-key on every request"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "timeout-ms",
        global = true,
        env = "DIDA_MCP_TIMEOUT_MS",
        help = "Per-call budget in milliseconds; values below 1000 fall back to 15000, values above 120000 are capped"
    )]
    pub timeout_ms: Option<u64>,

    #[arg(
        long = "protocol-version",
        global = true,
        env = "DIDA_MCP_PROTOCOL_VERSION",
        help = "MCP protocol version sent in the handshake and the MCP-Protocol-Version header"
    )]
    pub protocol_version: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `CliCommand` values.
pub enum CliCommand {
    /// Print the tool catalog as JSON.
    Tools,
    /// Execute one agent tool and print its output.
    Call {
        tool: String,
        #[arg(long = "args", value_parser = parse_json_arguments, help = "Tool arguments as a JSON object")]
        args: Option<Value>,
    },
}

impl Cli {
    pub fn config_overrides(&self) -> BridgeConfigOverrides {
        BridgeConfigOverrides {
            sse_url: self.sse_url.clone(),
            api_key: self.api_key.clone(),
            timeout_ms: self.timeout_ms,
            protocol_version: self.protocol_version.clone(),
        }
    }
}
