use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One item delivered to a streaming consumer.
///
/// A stream carries zero or more `Delta`s followed by exactly one terminal
/// item (`Done`, `Failed` or `Cancelled`); nothing follows the terminal item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Incremental reply text.
    Delta(String),
    /// Generation finished normally; may carry trailing text (often empty).
    Done(String),
    /// The engine failed before or during generation; carries the error description.
    Failed(String),
    /// The session was cancelled; no further text will arrive.
    Cancelled,
}

impl Chunk {
    /// Text carried by this chunk (empty for `Cancelled`).
    pub fn text(&self) -> &str {
        match self {
            Chunk::Delta(t) | Chunk::Done(t) | Chunk::Failed(t) => t,
            Chunk::Cancelled => "",
        }
    }

    /// Whether this is the terminal item of a stream.
    pub fn is_done(&self) -> bool {
        !matches!(self, Chunk::Delta(_))
    }
}

/// A local language-model inference engine.
///
/// Implementations receive a prompt that is already wrapped in the model's
/// turn delimiters and push reply fragments into `tx` in emission order.
/// Returning `Ok(())` marks the end of the reply; returning an error aborts it.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Engine name (e.g., "ollama", "mock").
    fn name(&self) -> &str;

    /// Stream a reply for `prompt` into `tx`.
    async fn generate(&self, prompt: &str, tx: mpsc::Sender<String>) -> Result<()>;

    /// Estimate how many tokens of context remain after `context`.
    async fn estimate_remaining(&self, context: &str) -> Result<usize>;
}
