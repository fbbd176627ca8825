use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dida_mcp::{ClientInfo, McpSseConfig, DEFAULT_PROTOCOL_VERSION, DEFAULT_TIMEOUT_MS};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_SSE_URL: &str = "http://127.0.0.1:3000/sse";
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 120_000;
pub const BRIDGE_CONFIG_SCHEMA_VERSION: u32 = 1;
pub const BRIDGE_CLIENT_NAME: &str = "dida-bridge";

#[derive(Debug, Deserialize)]
struct BridgeConfigFile {
    schema_version: u32,
    #[serde(default)]
    sse_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    timeout_ms: Option<Value>,
    #[serde(default)]
    protocol_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Values supplied on the command line or through the environment.
pub struct BridgeConfigOverrides {
    pub sse_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub protocol_version: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
/// Public struct `BridgeConfig` used across dida components.
pub struct BridgeConfig {
    pub sse_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub protocol_version: String,
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("sse_url", &self.sse_url)
            .field("api_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

impl BridgeConfig {
    /// Merges the optional config file with overrides; overrides win field by field.
    pub fn resolve(config_path: Option<&Path>, overrides: BridgeConfigOverrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => Some(load_bridge_config_file(path)?),
            None => None,
        };
        let file_sse_url = file.as_ref().and_then(|file| file.sse_url.clone());
        let file_api_key = file.as_ref().and_then(|file| file.api_key.clone());
        let file_timeout = file
            .as_ref()
            .and_then(|file| file.timeout_ms.as_ref())
            .and_then(Value::as_f64);
        let file_protocol = file.as_ref().and_then(|file| file.protocol_version.clone());

        let Some(api_key) = non_empty(overrides.api_key).or_else(|| non_empty(file_api_key)) else {
            bail!("mcp api key is not configured (set --api-key, DIDA_MCP_API_KEY or api_key in the config file)");
        };

        Ok(Self {
            sse_url: non_empty(overrides.sse_url)
                .or_else(|| non_empty(file_sse_url))
                .unwrap_or_else(|| DEFAULT_SSE_URL.to_string()),
            api_key,
            timeout_ms: normalize_timeout_ms(
                overrides
                    .timeout_ms
                    .map(|value| value as f64)
                    .or(file_timeout),
            ),
            protocol_version: non_empty(overrides.protocol_version)
                .or_else(|| non_empty(file_protocol))
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
        })
    }

    /// Builds the session configuration for one tool call.
    pub fn session_config(&self) -> Result<McpSseConfig> {
        let sse_url = Url::parse(&self.sse_url)
            .with_context(|| format!("invalid mcp sse url '{}'", self.sse_url))?;
        HeaderValue::from_str(&self.protocol_version).with_context(|| {
            format!(
                "protocol version '{}' is not a valid header value",
                self.protocol_version
            )
        })?;

        let mut config = McpSseConfig::new(sse_url)
            .with_api_key(&self.api_key)
            .context("failed to apply mcp api key")?
            .with_timeout(Duration::from_millis(self.timeout_ms));
        config.protocol_version = self.protocol_version.clone();
        config.client_info = ClientInfo {
            name: BRIDGE_CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        Ok(config)
    }
}

/// Values of at least one second are capped at two minutes; anything else
/// falls back to the default.
pub fn normalize_timeout_ms(value: Option<f64>) -> u64 {
    match value {
        Some(value) if value.is_finite() && value >= MIN_TIMEOUT_MS as f64 => {
            value.min(MAX_TIMEOUT_MS as f64) as u64
        }
        _ => DEFAULT_TIMEOUT_MS,
    }
}

fn load_bridge_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bridge config {}", path.display()))?;
    let parsed = serde_json::from_str::<BridgeConfigFile>(&raw)
        .with_context(|| format!("failed to parse bridge config {}", path.display()))?;
    if parsed.schema_version != BRIDGE_CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported bridge config schema_version {} in {} (expected {})",
            parsed.schema_version,
            path.display(),
            BRIDGE_CONFIG_SCHEMA_VERSION
        );
    }
    Ok(parsed)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
