use serde::{Deserialize, Serialize};

/// Compute backend a model prefers to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Cpu,
    Gpu,
}

/// Turn-delimiter convention a model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    #[default]
    Gemma,
}

/// Sampling parameters passed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sampling {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 64,
            top_p: 0.95,
        }
    }
}

/// Read-only description of a selectable model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub id: String,
    pub display_name: String,
    /// Local weight file location.
    pub path: String,
    /// Where the weights can be downloaded from.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub license_url: String,
    #[serde(default)]
    pub needs_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<Backend>,
    #[serde(default)]
    pub prompt_style: PromptStyle,
    #[serde(default)]
    pub sampling: Sampling,
    /// Context window, in tokens.
    pub context_tokens: usize,
    /// Model name understood by the serving engine.
    pub engine_model: String,
}

/// Where the reply to a silent submission is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SilentReplyPolicy {
    /// The reply appears in the visible transcript; the prompt stays hidden.
    #[default]
    Transcript,
    /// Both prompt and reply stay in the background buffer.
    Background,
}
