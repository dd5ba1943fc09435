// ABOUTME: Shared SSE line-buffering decoder for vendor streaming responses
// ABOUTME: Handles partial lines across TCP boundaries and multiple events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # SSE Stream Decoder
//!
//! A shared line-buffering decoder for Server-Sent Events used by the vendor
//! bindings. Solves two correctness issues:
//!
//! 1. **Multiple events per TCP chunk**: when network buffers batch several
//!    SSE events into one `bytes_stream()` chunk, all of them are emitted.
//!
//! 2. **Partial payloads across TCP boundaries**: a JSON payload split across
//!    two chunks is buffered until the full line arrives.
//!
//! Each vendor binding supplies a `parse_data` closure that converts raw JSON
//! strings into `StreamChunk` values. The SSE framing (line buffering, `data:`
//! prefix stripping, `[DONE]` detection) is handled once here.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{future, Stream, StreamExt};

use super::{ChatStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal (OpenAI convention)
    Done,
}

/// Line-buffering SSE decoder that handles partial lines across TCP chunks
///
/// SSE streams are newline-delimited. TCP does not guarantee alignment between
/// network chunks and SSE event boundaries. This decoder buffers incomplete
/// lines and emits events only when a full `\n`-terminated line is available.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated bytes not yet terminated by a newline
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    ///
    /// Complete lines are extracted and parsed; any trailing partial line
    /// stays buffered for the next `feed()` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            if let Some(event) = parse_sse_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush any remaining buffered content as a final event
    ///
    /// Called when the byte stream ends with a partial line still buffered
    /// (no trailing newline).
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_sse_line(&remaining).into_iter().collect()
    }
}

/// Parse a single SSE line into an event
///
/// Empty lines (event separators) and non-data fields (`event:`, `id:`,
/// `retry:`, comments) yield `None`.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed == "data: [DONE]" {
        return Some(SseEvent::Done);
    }

    if let Some(data) = trimmed.strip_prefix("data: ") {
        if !data.trim().is_empty() {
            return Some(SseEvent::Data(data.to_owned()));
        }
    }

    None
}

/// Create a properly-buffered fragment stream from a raw byte stream
///
/// Wraps a `reqwest` byte stream with SSE line buffering. The `parse_data`
/// closure converts vendor-specific JSON strings into `StreamChunk` values;
/// returning `None` skips events that produce no output (empty deltas,
/// metadata-only chunks).
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_data: F,
    vendor_name: &'static str,
) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
    };

    // unfold keeps the parser state across async iterations. Each iteration
    // either drains a pending event or reads the next TCP chunk.
    let stream = unfold(
        (
            Box::pin(byte_stream)
                as Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
            state,
            parse_data,
            vendor_name,
        ),
        |(mut byte_stream, mut state, parse_data, vendor_name)| async move {
            loop {
                // Drain pending events first (multiple SSE events per chunk)
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_data, vendor_name)));
                }

                if state.stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let events = state.parser.feed(&bytes);
                        state.enqueue(events, &parse_data);
                        // Loop to drain pending events
                    }
                    Some(Err(e)) => {
                        state.stream_ended = true;
                        return Some((
                            Err(AppError::provider(
                                vendor_name,
                                format!("Stream read error: {e}"),
                            )),
                            (byte_stream, state, parse_data, vendor_name),
                        ));
                    }
                    None => {
                        state.stream_ended = true;
                        let events = state.parser.flush();
                        state.enqueue(events, &parse_data);
                        if let Some(item) = state.pending.pop_front() {
                            return Some((item, (byte_stream, state, parse_data, vendor_name)));
                        }
                        return None;
                    }
                }
            }
        },
    );

    // Empty deltas carry no information unless they terminate the stream
    let filtered = stream.filter(|result| {
        future::ready(
            result
                .as_ref()
                .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final),
        )
    });

    Box::pin(filtered)
}

/// Internal state for the SSE stream unfold
struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, AppError>>,
    stream_ended: bool,
}

impl SseStreamState {
    fn enqueue<F>(&mut self, events: Vec<SseEvent>, parse_data: &F)
    where
        F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
    {
        for event in events {
            match event {
                SseEvent::Data(json_str) => {
                    if let Some(result) = parse_data(&json_str) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => {
                    self.pending.push_back(Ok(StreamChunk {
                        delta: String::new(),
                        is_final: true,
                        finish_reason: Some("stop".to_owned()),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_event() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"x\":1}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_owned())]);
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_owned()),
                SseEvent::Data("{\"b\":2}".to_owned()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"delta\":\"hel").is_empty());
        let events = buffer.feed(b"lo\"}\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"delta\":\"hello\"}".to_owned())]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"x\":1}\r\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_owned())]);
    }

    #[test]
    fn test_non_data_fields_ignored() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"event: message\nid: 7\nretry: 100\n: comment\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_flush_recovers_unterminated_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: [DONE]").is_empty());
        assert_eq!(buffer.flush(), vec![SseEvent::Done]);
        assert!(buffer.flush().is_empty());
    }
}
