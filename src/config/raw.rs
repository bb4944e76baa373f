// Raw YAML deserialization types (internal)
// These are separate from the public Config structs because:
// 1. All fields except the API key have defaults applied between raw and public
// 2. We do variable interpolation on credential fields between raw and public
// 3. Keeps the public API clean

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub upstream: RawUpstreamConfig,
    pub chat: Option<RawChatConfig>,
    pub session: Option<RawSessionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    /// API credential. Supports `${VAR}` environment interpolation.
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawChatConfig {
    pub system_prompt: Option<String>,
    pub max_history: Option<usize>,
    pub max_message_chars: Option<usize>,
    pub streaming: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawSessionConfig {
    pub max_inactive_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}
