//! EdgeChat runtime configuration schema.
//!
//! Every section is optional so a partial YAML file deserializes cleanly;
//! `defaults::apply_all_defaults` fills in what was left out.

use serde::{Deserialize, Serialize};

use edgechat_core::{ModelSpec, SilentReplyPolicy};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeChatConfig {
    /// Inference engine selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Conversation behaviour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    /// External sensor feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Models registered alongside the built-in catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelSpec>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// `ollama` or `mock`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Catalog id of the model to load at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Overrides the selected model's context window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<usize>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent_replies: Option<SilentReplyPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_buffer: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_buffer: Option<usize>,

    /// Reject prompts containing turn delimiters instead of escaping them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_control_tokens: Option<bool>,
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    /// `host:port` of the broker; no feed is started when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// MQTT-style topic filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// MQTT client id; keep it stable so the broker resumes the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting_topic: Option<String>,

    /// Published once per connection; empty disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_secs: Option<u64>,

    /// Readings held while a generation is in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Instruction template; `{reading}` is replaced by the decoded reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for the rolling JSON log; console only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}
