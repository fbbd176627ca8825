#![no_main]

use dida_mcp::{resolve_endpoint, McpSseErrorKind, Url};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let payload = String::from_utf8_lossy(data);
    let Ok(base) = Url::parse("http://127.0.0.1:3000/sse") else {
        return;
    };
    match resolve_endpoint(&payload, &base) {
        Ok(url) => assert!(!url.as_str().is_empty()),
        Err(error) => assert_eq!(error.kind(), McpSseErrorKind::EndpointResolution),
    }
});
