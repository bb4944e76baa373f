// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface.
//
// Responsibilities:
// - One chat endpoint: POST /api/chat
// - Session identification via X-Session-Id header (generated when absent)
// - Streaming (SSE) or single-shot response framing, per config
// - Structured failure bodies; turn failures never take the process down
// - Heartbeat endpoint and permissive CORS for browser clients

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::relay::{FragmentSink, SseClientSink};
use crate::turn::{TurnController, TurnError};
use crate::upstream::UpstreamError;

/// Session identifier header, inbound and outbound.
pub const SESSION_HEADER: &str = "x-session-id";

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub turns: Arc<TurnController>,
    /// Streamed (SSE) vs. single-shot framing toward the client.
    pub streaming: bool,
}

// ---------------------------------------------------------------------------
// Request / error mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let status = match &self {
            TurnError::EmptyMessage => StatusCode::BAD_REQUEST,
            TurnError::Upstream(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            TurnError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TurnError::ClientGone(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /healthz -> 200 OK
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Chat endpoint. Runs one turn for the session named by X-Session-Id,
/// generating a fresh identifier when the header is absent.
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let session_id = session_id_from(&headers);

    if state.streaming {
        // Validate before committing to a 200 streaming response; everything
        // after this point is reported in-stream.
        if request.message.trim().is_empty() {
            return TurnError::EmptyMessage.into_response();
        }
        stream_response(state, session_id, request.message)
    } else {
        match state.turns.blocking_turn(&session_id, &request.message).await {
            Ok(outcome) => (
                [(SESSION_HEADER, session_id.as_str())],
                Json(serde_json::json!({
                    "sessionId": outcome.session_id,
                    "response": outcome.content,
                })),
            )
                .into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// Start the streaming turn in its own task and hand the client the event
/// stream it feeds. Mid-stream failures become an in-stream error event;
/// the session itself is already rolled back by the turn controller.
fn stream_response(state: AppState, session_id: String, message: String) -> Response {
    let (sink, events) = SseClientSink::channel(64);

    let turns = state.turns.clone();
    let task_session_id = session_id.clone();
    tokio::spawn(async move {
        let mut sink = sink;
        if let Err(e) = turns
            .streaming_turn(&task_session_id, &message, &mut sink)
            .await
        {
            if !matches!(e, TurnError::ClientGone(_)) {
                sink.fail(&e.to_string()).await;
            }
        }
    });

    let body = Body::from_stream(events.map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(SESSION_HEADER, session_id)
        .body(body)
        .unwrap()
}

fn session_id_from(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

/// Permissive CORS: the relay is meant to sit behind a browser client on a
/// different origin. Max-Age caches the preflight for a day.
async fn cors(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert("access-control-allow-methods", HeaderValue::from_static("*"));
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
    headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
    response
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with the chat endpoint and the heartbeat.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn(cors))
        .with_state(state)
}

/// The address the relay binds to. Always localhost, never 0.0.0.0.
pub const BIND_ADDR: [u8; 4] = [127, 0, 0, 1];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
