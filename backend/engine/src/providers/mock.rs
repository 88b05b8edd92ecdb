use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use edgechat_core::InferenceEngine;

#[derive(Debug, Clone)]
enum Failure {
    BeforeStream(String),
    AfterStream(String),
}

/// A scripted engine that replays canned chunks.
///
/// Records every prompt it receives, can be held open on a gate until the
/// caller releases it, and can fail before or after streaming.
pub struct MockEngine {
    name: String,
    chunks: Vec<String>,
    failure: Option<Failure>,
    remaining: usize,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    estimate_gate: Option<Arc<Notify>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            chunks: vec!["Mock response".to_string()],
            failure: None,
            remaining: 1024,
            delay: None,
            gate: None,
            estimate_gate: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Fail before any chunk is produced.
    pub fn failing_before(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(Failure::BeforeStream(message.into()));
        self
    }

    /// Fail after every chunk has been produced.
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(Failure::AfterStream(message.into()));
        self
    }

    /// Value returned by `estimate_remaining`.
    pub fn with_remaining(mut self, remaining: usize) -> Self {
        self.remaining = remaining;
        self
    }

    /// Pause between chunks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold each generation until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Hold each `estimate_remaining` call until `gate` is notified.
    pub fn with_estimate_gate(mut self, gate: Arc<Notify>) -> Self {
        self.estimate_gate = Some(gate);
        self
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Shared handle to the prompt log, usable after the engine is moved.
    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, tx: mpsc::Sender<String>) -> Result<()> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(Failure::BeforeStream(message)) = &self.failure {
            anyhow::bail!("{}", message);
        }

        for chunk in &self.chunks {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if tx.send(chunk.clone()).await.is_err() {
                return Ok(());
            }
        }

        if let Some(Failure::AfterStream(message)) = &self.failure {
            anyhow::bail!("{}", message);
        }

        Ok(())
    }

    async fn estimate_remaining(&self, _context: &str) -> Result<usize> {
        if let Some(gate) = &self.estimate_gate {
            gate.notified().await;
        }
        Ok(self.remaining)
    }
}
