//! A single cancellable call into an inference engine.
//!
//! The engine pushes plain text deltas; the session forwards them as
//! [`Chunk`]s over a bounded channel and always closes the stream with
//! exactly one terminal chunk, whether the engine finished, failed, or the
//! session was cancelled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use edgechat_core::{Chunk, InferenceEngine};

/// Default bound on buffered chunks between engine and consumer.
pub const DEFAULT_CHUNK_BUFFER: usize = 64;

/// Control handle for a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    cancel: CancellationToken,
    finished: oneshot::Receiver<()>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop the session. The consumer receives `Chunk::Cancelled` as its
    /// terminal chunk unless a terminal chunk was already sent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this session when triggered.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the session has sent its terminal chunk and released the engine.
    pub async fn finished(self) {
        let _ = self.finished.await;
    }
}

/// Starts sessions against an engine.
pub struct InferenceSession;

impl InferenceSession {
    /// Run `prompt` through `engine` on a background task.
    pub fn start(
        engine: Arc<dyn InferenceEngine>,
        prompt: String,
        buffer: usize,
    ) -> (SessionHandle, mpsc::Receiver<Chunk>) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer.max(1));
        let (finished_tx, finished_rx) = oneshot::channel();

        let token = cancel.clone();
        let span = tracing::debug_span!("inference_session", session_id = %id, engine = engine.name());
        tokio::spawn(
            async move {
                drive(engine, prompt, chunk_tx, token, buffer.max(1)).await;
                let _ = finished_tx.send(());
            }
            .instrument(span),
        );

        (
            SessionHandle {
                id,
                cancel,
                finished: finished_rx,
            },
            chunk_rx,
        )
    }
}

async fn drive(
    engine: Arc<dyn InferenceEngine>,
    prompt: String,
    out: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
    buffer: usize,
) {
    let (delta_tx, mut delta_rx) = mpsc::channel::<String>(buffer);
    let generation = engine.generate(&prompt, delta_tx);
    tokio::pin!(generation);

    let terminal = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Chunk::Cancelled,
            delta = delta_rx.recv() => match delta {
                Some(text) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Chunk::Cancelled,
                        sent = out.send(Chunk::Delta(text)) => {
                            if sent.is_err() {
                                debug!("Chunk consumer gone; stopping session");
                                return;
                            }
                        }
                    }
                }
                // The engine dropped its sender early; wait for its verdict.
                None => {
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Chunk::Cancelled,
                        outcome = &mut generation => outcome,
                    };
                    break terminal_for(outcome);
                }
            },
            outcome = &mut generation => {
                // Every delta the engine sent is already buffered.
                while let Ok(text) = delta_rx.try_recv() {
                    if out.send(Chunk::Delta(text)).await.is_err() {
                        return;
                    }
                }
                break terminal_for(outcome);
            }
        }
    };

    if matches!(terminal, Chunk::Failed(_)) {
        warn!(error = %terminal.text(), "Inference failed");
    }
    let _ = out.send(terminal).await;
}

fn terminal_for(outcome: anyhow::Result<()>) -> Chunk {
    match outcome {
        Ok(()) => Chunk::Done(String::new()),
        Err(e) => Chunk::Failed(format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use edgechat_engine::providers::mock::MockEngine;

    async fn collect(mut rx: mpsc::Receiver<Chunk>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_deltas_then_single_done() {
        let engine = Arc::new(MockEngine::new().with_chunks(["a", "b", "c"]));
        let (handle, rx) = InferenceSession::start(engine, "p".into(), 4);

        let chunks = collect(rx).await;
        assert_eq!(
            chunks,
            vec![
                Chunk::Delta("a".into()),
                Chunk::Delta("b".into()),
                Chunk::Delta("c".into()),
                Chunk::Done(String::new()),
            ]
        );
        timeout(Duration::from_secs(5), handle.finished()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_before_any_chunk() {
        let engine = Arc::new(MockEngine::new().failing_before("model not loaded"));
        let (_handle, rx) = InferenceSession::start(engine, "p".into(), 4);

        let chunks = collect(rx).await;
        assert_eq!(chunks, vec![Chunk::Failed("model not loaded".into())]);
    }

    #[tokio::test]
    async fn test_failure_after_stream_keeps_deltas() {
        let engine = Arc::new(MockEngine::new().with_chunks(["x"]).failing_after("lost gpu"));
        let (_handle, rx) = InferenceSession::start(engine, "p".into(), 4);

        let chunks = collect(rx).await;
        assert_eq!(
            chunks,
            vec![Chunk::Delta("x".into()), Chunk::Failed("lost gpu".into())]
        );
    }

    #[tokio::test]
    async fn test_cancel_ends_with_cancelled() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(MockEngine::new().with_gate(Arc::clone(&gate)));
        let (handle, rx) = InferenceSession::start(engine, "p".into(), 4);

        handle.cancel();
        let chunks = collect(rx).await;
        assert_eq!(chunks, vec![Chunk::Cancelled]);
        timeout(Duration::from_secs(5), handle.finished()).await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_reaches_engine() {
        let engine = MockEngine::new();
        let prompts = engine.prompt_log();
        let (_handle, rx) = InferenceSession::start(Arc::new(engine), "formatted".into(), 4);
        collect(rx).await;
        assert_eq!(*prompts.lock().unwrap(), vec!["formatted".to_string()]);
    }
}
