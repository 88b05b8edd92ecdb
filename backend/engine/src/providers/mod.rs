pub mod mock;
pub mod ollama;

use std::str::FromStr;
use std::sync::Arc;

use edgechat_core::{ChatError, InferenceEngine, ModelSpec};

use self::mock::MockEngine;
use self::ollama::OllamaEngine;

/// Which engine adapter to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Ollama,
    Mock,
}

impl FromStr for EngineKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EngineKind::Ollama),
            "mock" => Ok(EngineKind::Mock),
            other => Err(ChatError::Config(format!("unknown engine provider: {other}"))),
        }
    }
}

/// Construct an engine for `spec`.
///
/// The caller owns the returned engine; nothing here is process-global.
pub fn build_engine(
    kind: EngineKind,
    base_url: Option<&str>,
    spec: &ModelSpec,
) -> Arc<dyn InferenceEngine> {
    match kind {
        EngineKind::Ollama => {
            let mut engine = OllamaEngine::new(spec);
            if let Some(url) = base_url {
                engine = engine.with_base_url(url);
            }
            Arc::new(engine)
        }
        EngineKind::Mock => Arc::new(
            MockEngine::new()
                .with_chunks(["Mock ", "response"])
                .with_remaining(spec.context_tokens),
        ),
    }
}
