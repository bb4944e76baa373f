// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator.
//
// Loads parley.yaml, applies defaults, resolves variable interpolation in
// credential fields, and validates values before the relay starts serving.

use std::time::Duration;

mod error;
mod interpolation;
mod raw;
mod source;

pub use error::ConfigError;
pub use source::{ConfigSource, FileSource, StringSource};

use interpolation::resolve_variables;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's questions accurately.";
const DEFAULT_MAX_HISTORY: usize = 10;
const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;
const DEFAULT_MAX_INACTIVE_SECS: u64 = 30 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

// ---------------------------------------------------------------------------
// Typed config structs
// ---------------------------------------------------------------------------

/// Top-level parsed and validated parley config.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub chat: ChatConfig,
    pub session: SessionConfig,
}

/// How to reach the upstream chat-completion API.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Bearer credential sent with every upstream request.
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    /// Response-size cap forwarded to the upstream.
    pub max_tokens: u32,
    /// Per-request timeout. Timeouts are treated like transport errors.
    pub timeout_ms: Option<u64>,
}

/// Conversation shaping: prompt, history window, input cap.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Fixed leading system message, set once at session creation.
    pub system_prompt: String,
    /// Maximum message count per session, counting the system message.
    pub max_history: usize,
    /// User input is truncated to this many characters before storage.
    pub max_message_chars: usize,
    /// Streamed (SSE) vs. single-shot response framing toward the client.
    pub streaming: bool,
}

/// Session expiry policy for the reaper.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_inactive: Duration,
    pub sweep_interval: Duration,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate a parley config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Parse into raw deserialization types
/// 3. Resolve `${VAR}` interpolation in credential fields
/// 4. Apply defaults and validate values
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    let api_key = resolve_variables(&raw.upstream.api_key)?;
    if api_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.api_key must not be empty".to_string(),
        ));
    }

    let temperature = raw.upstream.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "upstream.temperature must be between 0.0 and 2.0, got {temperature}"
        )));
    }

    let chat = raw.chat.as_ref();
    let max_history = chat
        .and_then(|c| c.max_history)
        .unwrap_or(DEFAULT_MAX_HISTORY);
    // The window must hold the system message plus at least one full turn.
    if max_history < 3 {
        return Err(ConfigError::Validation(format!(
            "chat.max_history must be at least 3, got {max_history}"
        )));
    }

    let max_message_chars = chat
        .and_then(|c| c.max_message_chars)
        .unwrap_or(DEFAULT_MAX_MESSAGE_CHARS);
    if max_message_chars == 0 {
        return Err(ConfigError::Validation(
            "chat.max_message_chars must be greater than zero".to_string(),
        ));
    }

    let session = raw.session.as_ref();

    Ok(Config {
        upstream: UpstreamConfig {
            api_key,
            endpoint: raw
                .upstream
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: raw
                .upstream
                .model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature,
            max_tokens: raw.upstream.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout_ms: Some(raw.upstream.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        },
        chat: ChatConfig {
            system_prompt: chat
                .and_then(|c| c.system_prompt.clone())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_history,
            max_message_chars,
            streaming: chat.and_then(|c| c.streaming).unwrap_or(true),
        },
        session: SessionConfig {
            max_inactive: Duration::from_secs(
                session
                    .and_then(|s| s.max_inactive_secs)
                    .unwrap_or(DEFAULT_MAX_INACTIVE_SECS),
            ),
            sweep_interval: Duration::from_secs(
                session
                    .and_then(|s| s.sweep_interval_secs)
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
