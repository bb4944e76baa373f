// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Relay/forwarder toward the client.
//
// Re-emits decoded fragments to the waiting client connection in SSE
// framing, independent of how the upstream framed them. Each event is
// self-contained: a client can parse any `data:` record without having seen
// the previous ones. Fragments are forwarded in strict arrival order with no
// buffering beyond the channel the response body reads from.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The client connection went away; a write can no longer be delivered.
///
/// Treated by the turn controller as a stream failure equivalent to an
/// upstream error: the turn rolls back and the upstream stream is dropped.
#[derive(Debug, thiserror::Error)]
#[error("client connection closed")]
pub struct ClientGone;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Frame one content fragment as a self-contained SSE event.
pub fn frame_fragment(content: &str) -> Bytes {
    let payload = serde_json::json!({ "content": content });
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Terminal event sent once after the last fragment of a successful stream.
pub fn frame_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Frame a mid-stream failure as an SSE event the client can surface.
pub fn frame_error(message: &str) -> Bytes {
    let payload = serde_json::json!({ "error": message });
    Bytes::from(format!("data: {payload}\n\n"))
}

// ---------------------------------------------------------------------------
// Trait: FragmentSink
// ---------------------------------------------------------------------------

/// Where the streaming turn pushes fragments as they arrive.
///
/// Implementations must not buffer: `send` resolves when the fragment has
/// been handed to the transport (or its channel), so upstream consumption is
/// paced by client backpressure and nothing else.
#[async_trait]
pub trait FragmentSink: Send {
    /// Forward one non-empty content fragment.
    async fn send(&mut self, fragment: &str) -> Result<(), ClientGone>;

    /// Forward the terminal marker. Called exactly once, on stream success.
    async fn done(&mut self) -> Result<(), ClientGone>;

    /// Report a mid-stream failure to the client. Best effort: the client
    /// may already be gone.
    async fn fail(&mut self, message: &str);
}

// ---------------------------------------------------------------------------
// SSE sink backed by an mpsc channel
// ---------------------------------------------------------------------------

/// Sink feeding an SSE response body. The receiving half is handed to the
/// HTTP layer as a streaming body; when the client disconnects the receiver
/// drops and every subsequent write reports `ClientGone`.
pub struct SseClientSink {
    tx: mpsc::Sender<Bytes>,
}

impl SseClientSink {
    /// Create a sink and the stream of framed events it feeds.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl FragmentSink for SseClientSink {
    async fn send(&mut self, fragment: &str) -> Result<(), ClientGone> {
        self.tx
            .send(frame_fragment(fragment))
            .await
            .map_err(|_| ClientGone)
    }

    async fn done(&mut self) -> Result<(), ClientGone> {
        self.tx.send(frame_done()).await.map_err(|_| ClientGone)
    }

    async fn fail(&mut self, message: &str) {
        let _ = self.tx.send(frame_error(message)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn framed_fragment_is_self_contained() {
        let event = frame_fragment("Hi there");
        let text = std::str::from_utf8(&event).unwrap();

        let payload = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["content"], "Hi there");
    }

    #[test]
    fn framing_escapes_content() {
        let event = frame_fragment("line\nbreak \"quoted\"");
        let text = std::str::from_utf8(&event).unwrap();
        // The newline inside the content must be JSON-escaped, never a raw
        // byte that would split the SSE record.
        assert_eq!(text.matches('\n').count(), 2);

        let payload = text.strip_prefix("data: ").unwrap().trim_end();
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["content"], "line\nbreak \"quoted\"");
    }

    #[test]
    fn done_event_uses_the_sentinel() {
        assert_eq!(&frame_done()[..], b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn sink_forwards_events_in_order() {
        let (mut sink, mut rx) = SseClientSink::channel(8);

        sink.send("a").await.unwrap();
        sink.send("b").await.unwrap();
        sink.done().await.unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(bytes) = rx.next().await {
            events.push(String::from_utf8(bytes.to_vec()).unwrap());
        }

        assert_eq!(events.len(), 3);
        assert!(events[0].contains("\"a\""));
        assert!(events[1].contains("\"b\""));
        assert_eq!(events[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn dropped_receiver_reports_client_gone() {
        let (mut sink, rx) = SseClientSink::channel(8);
        drop(rx);

        assert!(sink.send("lost").await.is_err());
        assert!(sink.done().await.is_err());
        // fail() is best effort and must not panic with the client gone.
        sink.fail("boom").await;
    }

    #[tokio::test]
    async fn fail_emits_an_error_event() {
        let (mut sink, mut rx) = SseClientSink::channel(8);
        sink.fail("upstream request failed").await;
        drop(sink);

        let bytes = rx.next().await.unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let payload = text.strip_prefix("data: ").unwrap().trim_end();
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["error"], "upstream request failed");
    }
}
