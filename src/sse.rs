// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Event-stream decoder.
//
// Turns the upstream's newline-delimited SSE byte stream into a finite
// sequence of content fragments. `Ok` items are non-empty content strings;
// the stream ending is the success marker; an `Err` item is a transport
// failure and nothing follows it.
//
// Parsing rules:
// - Only lines prefixed `data:` carry payloads; everything else is skipped.
// - The literal payload `[DONE]` ends the stream successfully. Remaining
//   buffered bytes are discarded and the input is dropped, not drained.
// - A payload missing `choices[0].delta.content` is a no-op, not an error.
// - Malformed JSON in a single record is logged and skipped.
// - Transport end without the sentinel is still a successful end-of-stream.
// - A transport error is forwarded immediately; any partial record buffered
//   at that point is discarded.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::upstream::UpstreamError;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// What a single decoded line means to the stream loop.
enum Record {
    Content(String),
    Done,
    Skip,
}

/// Decode an upstream byte stream into content fragments.
///
/// The decoder runs in a spawned task and hands fragments over an mpsc
/// channel, so the consumer can lag (client backpressure) without blocking
/// the parse of already-received bytes beyond the channel capacity.
pub fn decode(
    mut input: impl Stream<Item = Result<Bytes, UpstreamError>> + Send + Unpin + 'static,
) -> impl Stream<Item = Result<String, UpstreamError>> {
    let (tx, rx) = mpsc::channel::<Result<String, UpstreamError>>(64);

    tokio::spawn(async move {
        let mut line_buffer = String::new();

        while let Some(chunk) = input.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Transport failure: discard the partial record, forward
                    // the error, stop.
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_string();
                line_buffer.replace_range(..newline_pos + 1, "");

                match parse_record(&line) {
                    Record::Done => return, // input dropped here: stream closed
                    Record::Content(fragment) => {
                        if tx.send(Ok(fragment)).await.is_err() {
                            return; // consumer gone
                        }
                    }
                    Record::Skip => {}
                }
            }
        }

        // Transport ended without the sentinel: flush a trailing record with
        // no newline, then treat closure as successful completion.
        if !line_buffer.is_empty() {
            if let Record::Content(fragment) = parse_record(&line_buffer) {
                let _ = tx.send(Ok(fragment)).await;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Parse a single line of the event stream.
fn parse_record(line: &str) -> Record {
    let trimmed = line.trim();

    let payload = match trimmed.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.trim_start(),
        // Blank lines, comments, `event:` lines: ignorable, not errors.
        None => return Record::Skip,
    };

    if payload == DONE_SENTINEL {
        return Record::Done;
    }

    let json: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, raw = payload, "skipping malformed stream record");
            return Record::Skip;
        }
    };

    match extract_delta_content(&json) {
        Some(content) if !content.is_empty() => Record::Content(content),
        // Role-only deltas and finish_reason chunks carry no content.
        _ => Record::Skip,
    }
}

/// Pull `choices[0].delta.content` out of a data payload, if present.
fn extract_delta_content(json: &serde_json::Value) -> Option<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
