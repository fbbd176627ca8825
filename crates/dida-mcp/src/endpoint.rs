use reqwest::Url;
use serde_json::Value;

use crate::McpSseError;

/// Resolves the POST endpoint announced by the first `endpoint` event.
///
/// The payload is either a bare URL or a JSON object carrying it under
/// `endpoint` or `uri`. The chosen value is joined onto the stream URL, so
/// relative paths and queries are supported.
pub fn resolve_endpoint(payload: &str, base: &Url) -> Result<Url, McpSseError> {
    let candidate = endpoint_candidate(payload);
    if candidate.is_empty() {
        return Err(McpSseError::EndpointResolution {
            payload: payload.to_string(),
            reason: "endpoint payload is empty".to_string(),
        });
    }

    base.join(&candidate)
        .map_err(|error| McpSseError::EndpointResolution {
            payload: payload.to_string(),
            reason: error.to_string(),
        })
}

fn endpoint_candidate(payload: &str) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(payload) {
        let field = ["endpoint", "uri"].iter().find_map(|key| {
            object
                .get(*key)
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
        });
        if let Some(value) = field {
            return value.trim().to_string();
        }
    }
    payload.trim().to_string()
}
