use thiserror::Error;

/// Top-level error type for the EdgeChat runtime.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a generation is already in progress")]
    Busy,

    #[error("prompt rejected: {0}")]
    InvalidPrompt(String),

    #[error("inference engine error ({engine}): {message}")]
    Engine { engine: String, message: String },

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Whether the error is the transient "generation in progress" rejection.
    pub fn is_busy(&self) -> bool {
        matches!(self, ChatError::Busy)
    }
}
