use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use edgechat_core::{ChatError, InferenceEngine, ModelSpec, Sampling};

use crate::estimate::remaining_after;

/// Ollama local inference engine, streaming from `/api/generate`.
///
/// Prompts arrive already wrapped in the model's turn delimiters, so requests
/// are sent with `raw: true` to bypass Ollama's own templating.
pub struct OllamaEngine {
    client: Client,
    base_url: String,
    model: String,
    sampling: Sampling,
    context_tokens: usize,
}

impl OllamaEngine {
    pub fn new(spec: &ModelSpec) -> Self {
        Self {
            client: Client::new(),
            base_url: "http://localhost:11434".to_string(),
            model: spec.engine_model.clone(),
            sampling: spec.sampling,
            context_tokens: spec.context_tokens,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    num_ctx: usize,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

fn engine_error(message: impl Into<String>) -> anyhow::Error {
    ChatError::Engine {
        engine: "ollama".to_string(),
        message: message.into(),
    }
    .into()
}

/// Parse one NDJSON line of a streaming response.
fn parse_stream_line(line: &[u8]) -> Result<Option<StreamLine>> {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed: StreamLine =
        serde_json::from_str(trimmed).context("Failed to parse Ollama stream line")?;
    if let Some(message) = parsed.error {
        return Err(engine_error(message));
    }
    Ok(Some(parsed))
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, tx: mpsc::Sender<String>) -> Result<()> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            raw: true,
            stream: true,
            options: GenerateOptions {
                temperature: self.sampling.temperature,
                top_k: self.sampling.top_k,
                top_p: self.sampling.top_p,
                num_ctx: self.context_tokens,
            },
        };

        debug!(model = %self.model, "Sending generate request to Ollama");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Ollama HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(engine_error(format!("HTTP {status}: {error_body}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.context("Ollama stream interrupted")?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let Some(parsed) = parse_stream_line(&line)? else {
                    continue;
                };
                if !parsed.response.is_empty() && tx.send(parsed.response).await.is_err() {
                    debug!("Chunk receiver dropped; abandoning Ollama stream");
                    return Ok(());
                }
                if parsed.done {
                    return Ok(());
                }
            }
        }

        // Trailing line without a newline terminator.
        if let Some(parsed) = parse_stream_line(&buffer)? {
            if !parsed.response.is_empty() {
                let _ = tx.send(parsed.response).await;
            }
            if !parsed.done {
                warn!(model = %self.model, "Ollama stream ended without a done marker");
            }
        }

        Ok(())
    }

    async fn estimate_remaining(&self, context: &str) -> Result<usize> {
        Ok(remaining_after(self.context_tokens, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;

    #[test]
    fn test_parse_delta_line() {
        let line = br#"{"model":"gemma3:1b","response":"Hel","done":false}"#;
        let parsed = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(parsed.response, "Hel");
        assert!(!parsed.done);
    }

    #[test]
    fn test_parse_done_line() {
        let line = br#"{"response":"","done":true,"eval_count":12}"#;
        let parsed = parse_stream_line(line).unwrap().unwrap();
        assert!(parsed.done);
    }

    #[test]
    fn test_parse_blank_and_error_lines() {
        assert!(parse_stream_line(b"  \n").unwrap().is_none());
        let err = parse_stream_line(br#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_estimate_uses_context_window() {
        let catalog = ModelCatalog::new();
        let engine = OllamaEngine::new(catalog.default_model().unwrap())
            .with_base_url("http://127.0.0.1:11434/");
        assert_eq!(engine.base_url, "http://127.0.0.1:11434");
        assert_eq!(engine.estimate_remaining("abcdefgh").await.unwrap(), 1022);
    }
}
