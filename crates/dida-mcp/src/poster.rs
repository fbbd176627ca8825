use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::watch;

use crate::{cancel::wait_for_cancellation, McpSseError};

/// Sends one JSON-RPC envelope to the negotiated endpoint.
///
/// Any 2xx or 3xx status counts as delivered; the correlated response, if
/// any, arrives on the event stream. A raised cancellation signal aborts the
/// request and reports [`McpSseError::Cancelled`].
pub async fn post_envelope<T>(
    http: &reqwest::Client,
    endpoint: &Url,
    envelope: &T,
    headers: &HeaderMap,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<(), McpSseError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(envelope)?;
    let mut request_headers = headers.clone();
    request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let request = http
        .post(endpoint.clone())
        .headers(request_headers)
        .body(body);

    let send = async move {
        let response = request
            .send()
            .await
            .map_err(|error| McpSseError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(McpSseError::TransportStatus {
            status: status.as_u16(),
            body,
        })
    };

    tokio::select! {
        biased;
        _ = wait_for_cancellation(cancel_rx) => Err(McpSseError::Cancelled),
        result = send => result,
    }
}
