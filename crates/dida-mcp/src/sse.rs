use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};

use crate::{McpSseError, StreamEvent, DEFAULT_EVENT_TYPE};

/// Incremental `text/event-stream` decoder.
///
/// Bytes are fed in whatever chunks the transport delivers. Multi-byte UTF-8
/// sequences split across chunks are held back until complete, `\r\n` is
/// normalized to `\n`, and every blank-line-terminated record that carries at
/// least one `data:` line yields a [`StreamEvent`]. A trailing partial record
/// stays buffered for the next chunk.
///
/// Each decoded character is normalized exactly once, when it enters the
/// buffer; a chunk-final `\r` waits for the next chunk to see whether a `\n`
/// follows.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    pending_bytes: Vec<u8>,
    pending_cr: bool,
    buffer: String,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut text = String::new();
        if std::mem::take(&mut self.pending_cr) {
            text.push('\r');
        }
        self.decode_utf8(chunk, &mut text);
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }
        self.buffer.push_str(&text.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let record: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_sse_record(&record[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes and characters held back waiting for more input.
    pub fn buffered_len(&self) -> usize {
        self.pending_bytes.len() + usize::from(self.pending_cr) + self.buffer.len()
    }

    fn decode_utf8(&mut self, chunk: &[u8], out: &mut String) {
        self.pending_bytes.extend_from_slice(chunk);
        let mut consumed = 0;
        while consumed < self.pending_bytes.len() {
            match std::str::from_utf8(&self.pending_bytes[consumed..]) {
                Ok(text) => {
                    out.push_str(text);
                    consumed = self.pending_bytes.len();
                }
                Err(error) => {
                    let valid_end = consumed + error.valid_up_to();
                    if let Ok(text) =
                        std::str::from_utf8(&self.pending_bytes[consumed..valid_end])
                    {
                        out.push_str(text);
                    }
                    consumed = valid_end;
                    match error.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += invalid_len;
                        }
                        // incomplete sequence at the end of the chunk
                        None => break,
                    }
                }
            }
        }
        self.pending_bytes.drain(..consumed);
    }
}

/// Parses one record (without its terminating blank line).
pub fn parse_sse_record(record: &str) -> Option<StreamEvent> {
    let mut event_type = DEFAULT_EVENT_TYPE.to_string();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in record.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(StreamEvent {
        event_type,
        data: data_lines.join("\n"),
    })
}

/// Adapts a byte stream into a lazy stream of decoded events.
///
/// The stream ends when the source ends. A source error is yielded once as
/// [`McpSseError::Stream`] and terminates the stream.
pub fn sse_event_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<StreamEvent, McpSseError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let initial = Some((Box::pin(bytes), SseFrameDecoder::new(), VecDeque::new()));
    stream::unfold(initial, |state| async move {
        let (mut bytes, mut decoder, mut ready) = state?;
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event), Some((bytes, decoder, ready))));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                Some(Err(error)) => {
                    return Some((Err(McpSseError::Stream(error.to_string())), None));
                }
                None => return None,
            }
        }
    })
}
