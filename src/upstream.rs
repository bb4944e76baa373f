// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Upstream chat-completion client.
//
// The turn controller talks to the upstream API through the `UpstreamClient`
// trait so tests can inject scripted responses. The reqwest implementation
// issues a single POST with a bearer credential and either collects the full
// body or hands back the raw byte stream for SSE decoding.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::TryStreamExt;
use serde::Serialize;

use crate::config::UpstreamConfig;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// JSON body of the upstream chat-completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Selects streamed (SSE) vs. single-shot response framing.
    pub stream: bool,
}

/// Boxed upstream byte stream. Dropping it closes the connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Response body from the upstream, matching the request's `stream` flag.
pub enum UpstreamBody {
    Full(Bytes),
    Stream(ByteStream),
}

/// Errors that can occur while talking to the upstream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream response was malformed: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over the HTTP client that calls the chat-completion API.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<UpstreamBody, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Reqwest implementation
// ---------------------------------------------------------------------------

pub struct ReqwestUpstreamClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout_ms: Option<u64>,
}

impl ReqwestUpstreamClient {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
        }
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn complete(&self, request: CompletionRequest) -> Result<UpstreamBody, UpstreamError> {
        let streaming = request.stream;

        let mut req = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request);

        if let Some(timeout_ms) = self.timeout_ms {
            req = req.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(e.to_string())
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if streaming {
            let stream = resp.bytes_stream().map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(e.to_string())
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            });
            Ok(UpstreamBody::Stream(Box::pin(stream)))
        } else {
            let body = resp
                .bytes()
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            Ok(UpstreamBody::Full(body))
        }
    }
}

// ---------------------------------------------------------------------------
// Single-shot response parsing
// ---------------------------------------------------------------------------

/// Extract the assistant reply from a non-streaming completion body
/// (`choices[0].message.content`).
pub fn extract_reply(body: &[u8]) -> Result<String, UpstreamError> {
    let json: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| UpstreamError::Malformed(format!("invalid JSON: {e}")))?;

    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            UpstreamError::Malformed("missing choices[0].message.content".to_string())
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    #[test]
    fn completion_request_serializes_the_wire_shape() {
        let request = CompletionRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![
                Message::new(Role::System, "sys"),
                Message::new(Role::User, "hello"),
            ],
            temperature: 0.7,
            max_tokens: 1000,
            stream: true,
        };

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn extract_reply_reads_the_first_choice() {
        let body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "Hi there"}}
            ]
        });
        let reply = extract_reply(body.to_string().as_bytes()).unwrap();
        assert_eq!(reply, "Hi there");
    }

    #[test]
    fn extract_reply_rejects_invalid_json() {
        let result = extract_reply(b"not json");
        assert!(matches!(result, Err(UpstreamError::Malformed(_))));
    }

    #[test]
    fn extract_reply_rejects_missing_content() {
        let body = json!({"choices": [{"message": {"role": "assistant"}}]});
        let result = extract_reply(body.to_string().as_bytes());
        assert!(matches!(result, Err(UpstreamError::Malformed(_))));
    }

    #[test]
    fn extract_reply_rejects_empty_choices() {
        let body = json!({"choices": []});
        let result = extract_reply(body.to_string().as_bytes());
        assert!(matches!(result, Err(UpstreamError::Malformed(_))));
    }
}
