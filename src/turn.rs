// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Turn controller.
//
// Orchestrates one user turn end to end: append the user message, issue the
// upstream request, drive the decoder, forward fragments to the client sink,
// then commit or roll back the session. The per-session lock is held for the
// whole turn, so concurrent turns on the same key never interleave their
// mutations and no reader ever observes a half-applied turn.
//
// State machine per turn:
//   Idle -> UserAppended -> Streaming -> Committed     (success)
//                            Streaming -> RolledBack   (any failure)

use std::sync::Arc;

use tokio_stream::StreamExt;

use crate::config::{ChatConfig, UpstreamConfig};
use crate::message::{Message, Role};
use crate::relay::{ClientGone, FragmentSink};
use crate::session::{trim_history, SessionStore};
use crate::sse;
use crate::upstream::{
    extract_reply, ByteStream, CompletionRequest, UpstreamBody, UpstreamClient, UpstreamError,
};

/// Marker appended to user input that exceeded the configured length cap.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Successful turn: the committed assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub content: String,
}

/// Errors that fail a turn. Every variant leaves the session exactly as it
/// was before the turn began.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("message must be a non-empty string")]
    EmptyMessage,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("client connection closed mid-stream")]
    ClientGone(#[from] ClientGone),
}

// ---------------------------------------------------------------------------
// Input shaping
// ---------------------------------------------------------------------------

/// Cap user input at `max_chars`, appending a visible marker when truncated.
pub fn truncate_message(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(max_chars).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

// ---------------------------------------------------------------------------
// TurnController
// ---------------------------------------------------------------------------

pub struct TurnController {
    store: Arc<SessionStore>,
    upstream: Arc<dyn UpstreamClient>,
    request_opts: UpstreamConfig,
    chat: ChatConfig,
}

impl TurnController {
    pub fn new(
        store: Arc<SessionStore>,
        upstream: Arc<dyn UpstreamClient>,
        request_opts: UpstreamConfig,
        chat: ChatConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            request_opts,
            chat,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn request(&self, messages: Vec<Message>, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.request_opts.model.clone(),
            messages,
            temperature: self.request_opts.temperature,
            max_tokens: self.request_opts.max_tokens,
            stream,
        }
    }

    /// Run one streaming turn, forwarding fragments to `sink` as they arrive.
    pub async fn streaming_turn(
        &self,
        session_id: &str,
        user_input: &str,
        sink: &mut dyn FragmentSink,
    ) -> Result<TurnOutcome, TurnError> {
        if user_input.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let handle = self.store.get_or_create(session_id);
        let mut session = handle.lock().await;
        session.touch();

        // UserAppended: user message plus an empty placeholder the final
        // content lands in. Track what was appended so rollback removes
        // exactly that, in reverse append order.
        session.messages.push(Message::new(
            Role::User,
            truncate_message(user_input, self.chat.max_message_chars),
        ));
        session.messages.push(Message::new(Role::Assistant, ""));
        let placeholder_index = session.messages.len() - 1;
        let appended = 2;

        // The upstream sees the history without the placeholder.
        let request = self.request(session.messages[..placeholder_index].to_vec(), true);

        match self.relay_stream(request, sink).await {
            Ok(content) => {
                session.messages[placeholder_index].content = content.clone();
                trim_history(&mut session.messages, self.chat.max_history);
                session.touch();
                tracing::debug!(session_id, chars = content.len(), "turn committed");
                Ok(TurnOutcome {
                    session_id: session_id.to_string(),
                    content,
                })
            }
            Err(e) => {
                rollback(&mut session.messages, appended);
                tracing::warn!(session_id, error = %e, "turn rolled back");
                Err(e)
            }
        }
    }

    /// Run one non-streaming turn: a single upstream call, the complete
    /// reply appended as a new assistant message.
    pub async fn blocking_turn(
        &self,
        session_id: &str,
        user_input: &str,
    ) -> Result<TurnOutcome, TurnError> {
        if user_input.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let handle = self.store.get_or_create(session_id);
        let mut session = handle.lock().await;
        session.touch();

        session.messages.push(Message::new(
            Role::User,
            truncate_message(user_input, self.chat.max_message_chars),
        ));
        let appended = 1;

        let request = self.request(session.messages.clone(), false);

        match self.fetch_reply(request).await {
            Ok(content) => {
                session
                    .messages
                    .push(Message::new(Role::Assistant, content.clone()));
                trim_history(&mut session.messages, self.chat.max_history);
                session.touch();
                tracing::debug!(session_id, chars = content.len(), "turn committed");
                Ok(TurnOutcome {
                    session_id: session_id.to_string(),
                    content,
                })
            }
            Err(e) => {
                rollback(&mut session.messages, appended);
                tracing::warn!(session_id, error = %e, "turn rolled back");
                Err(e)
            }
        }
    }

    /// Streaming path: decode fragments, accumulate the full reply, and
    /// forward each fragment to the sink in arrival order.
    async fn relay_stream(
        &self,
        request: CompletionRequest,
        sink: &mut dyn FragmentSink,
    ) -> Result<String, TurnError> {
        let body = self.upstream.complete(request).await?;
        let byte_stream: ByteStream = match body {
            UpstreamBody::Stream(stream) => stream,
            // Some transports hand the whole body back at once; decode it
            // the same way.
            UpstreamBody::Full(bytes) => Box::pin(tokio_stream::once(Ok(bytes))),
        };

        let fragments = sse::decode(byte_stream);
        tokio::pin!(fragments);

        let mut content = String::new();
        while let Some(item) = fragments.next().await {
            let fragment = item?;
            content.push_str(&fragment);
            sink.send(&fragment).await?;
        }
        sink.done().await?;

        Ok(content)
    }

    /// Non-streaming path: collect the body and extract the single reply.
    async fn fetch_reply(&self, request: CompletionRequest) -> Result<String, TurnError> {
        let body = self.upstream.complete(request).await?;
        let bytes = match body {
            UpstreamBody::Full(bytes) => bytes,
            UpstreamBody::Stream(mut stream) => {
                let mut collected = Vec::new();
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                bytes::Bytes::from(collected)
            }
        };
        Ok(extract_reply(&bytes)?)
    }
}

/// Remove the messages appended by a failed turn, newest first, restoring
/// the exact pre-turn sequence.
fn rollback(messages: &mut Vec<Message>, appended: usize) {
    for _ in 0..appended {
        messages.pop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
