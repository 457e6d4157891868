//! SSE streaming response parser for `streamGenerateContent?alt=sse`.
//!
//! Reads the HTTP body as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), and parses each event as a partial
//! `GenerateContentResponse`. Each yielded `ModelResponse` is one fragment;
//! callers fold fragments together with [`ModelResponse::merge`].

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::{GenerateContentResponse, ModelResponse};

// ─── SSE parser ──────────────────────────────────────────────────────────────

/// Parse a raw SSE byte stream into response fragments.
///
/// Generic over the byte source so tests can feed canned chunks; in
/// production this is `reqwest::Response::bytes_stream()`.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ModelResponse, InferenceError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new(), false),
        |(mut byte_stream, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                // Events are cut out as bytes so a character split across
                // network chunks is decoded only once it is whole.
                if let Some(event_end) = find_event_end(&buffer) {
                    let event = String::from_utf8_lossy(&buffer[..event_end]).into_owned();
                    buffer.drain(..event_end + 2);

                    match process_event(&event) {
                        Ok(Some(fragment)) => {
                            return Some((Ok(fragment), (byte_stream, buffer, false)))
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (byte_stream, buffer, true))),
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(bytes.as_ref());
                        if buffer.contains(&b'\r') {
                            normalize_crlf(&mut buffer);
                        }
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer, true),
                        ));
                    }
                    None => {
                        // Stream ended; a final event may lack its trailing blank line.
                        let rest = String::from_utf8_lossy(&std::mem::take(&mut buffer)).into_owned();
                        if rest.trim().is_empty() {
                            return None;
                        }
                        return match process_event(rest.trim()) {
                            Ok(Some(fragment)) => Some((Ok(fragment), (byte_stream, buffer, true))),
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (byte_stream, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

/// Offset of the blank line that terminates the first complete event.
fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Collapse `\r\n` to `\n` in place. A trailing lone `\r` is kept so a pair
/// split across chunks still collapses once the `\n` arrives.
fn normalize_crlf(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] == b'\r' && buffer.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(buffer[i]);
        i += 1;
    }
    *buffer = out;
}

/// Process a single SSE event (may contain multiple `data:` lines).
fn process_event(event: &str) -> Result<Option<ModelResponse>, InferenceError> {
    let mut data_content = String::new();

    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(None);
            }
            data_content.push_str(data);
        }
        // Comments and `event:` lines carry nothing we need.
    }

    if data_content.is_empty() {
        return Ok(None);
    }

    let raw: GenerateContentResponse =
        serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
        })?;

    ModelResponse::from_wire(raw).map(Some)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
