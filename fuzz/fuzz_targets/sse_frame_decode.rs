#![no_main]

use dida_mcp::SseFrameDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split_seed, body)) = data.split_first() else {
        return;
    };

    let mut whole = SseFrameDecoder::new();
    let expected = whole.push(body);

    let step = usize::from(split_seed % 16) + 1;
    let mut chunked = SseFrameDecoder::new();
    let mut events = Vec::new();
    for chunk in body.chunks(step) {
        events.extend(chunked.push(chunk));
    }

    assert_eq!(events, expected);
});
