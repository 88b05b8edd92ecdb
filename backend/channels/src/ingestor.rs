//! Sensor ingestion.
//!
//! Feed payloads arrive on whatever task the feed runs on. Decoding happens
//! inline and never fails outward; accepted readings are queued for a worker
//! that submits them to the conversation silently once it is idle, so the
//! feed is never held up by a generation.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edgechat_agent::SessionOrchestrator;
use edgechat_core::Visibility;
use edgechat_logging::{EventLogger, TranscriptEvent};

use crate::sensor::SensorReading;
use crate::topic::topic_matches;
use crate::{EventFeed, FeedMessage};

/// Instruction sent for each reading. `{reading}` is replaced by the decoded reading.
pub const DEFAULT_INSTRUCTION: &str = "This is a sensor reading from the outside world. \
Extract the temperature and humidity from this {reading}";

const READING_PLACEHOLDER: &str = "{reading}";
const ECHO_BUFFER: usize = 64;
const FEED_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub topic_filter: String,
    /// Readings waiting for the conversation to become idle.
    pub queue_capacity: usize,
    pub instruction: String,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            topic_filter: "#".to_string(),
            queue_capacity: 8,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

/// What happened to one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Decoded and queued for silent submission.
    Queued(SensorReading),
    /// Topic did not match the configured filter.
    Filtered,
    /// Payload did not decode as a sensor reading.
    Discarded(String),
    /// The submission queue was full or the worker has stopped.
    Dropped,
}

pub struct EventIngestor {
    config: IngestorConfig,
    conversation_id: String,
    queue: mpsc::Sender<String>,
    echo: broadcast::Sender<FeedMessage>,
    cancel: CancellationToken,
}

impl EventIngestor {
    /// Start the submission worker for `orchestrator`.
    pub fn spawn(orchestrator: SessionOrchestrator, config: IngestorConfig) -> Arc<Self> {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (echo, _) = broadcast::channel(ECHO_BUFFER);
        let cancel = CancellationToken::new();
        let conversation_id = orchestrator.conversation_id().to_string();

        tokio::spawn(submit_worker(orchestrator, rx, cancel.clone()));

        Arc::new(Self {
            config,
            conversation_id,
            queue,
            echo,
            cancel,
        })
    }

    /// Handle one payload without waiting on the conversation.
    pub fn on_payload(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        if !topic_matches(&self.config.topic_filter, topic) {
            debug!(%topic, filter = %self.config.topic_filter, "Ignoring payload on unmatched topic");
            return IngestOutcome::Filtered;
        }

        let text = String::from_utf8_lossy(payload);
        EventLogger::log_event(
            &self.conversation_id,
            TranscriptEvent::FeedPayload {
                topic: topic.to_string(),
                payload: text.to_string(),
            },
        );

        let reading = match SensorReading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(%topic, error = %e, "Discarding malformed sensor payload");
                return IngestOutcome::Discarded(e.to_string());
            }
        };

        let _ = self.echo.send(FeedMessage::new(topic, payload));

        let instruction = self.instruction_for(&reading);
        match self.queue.try_send(instruction) {
            Ok(()) => {
                info!(%topic, %reading, "Queued sensor reading");
                IngestOutcome::Queued(reading)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%topic, %reading, "Submission queue full; dropping sensor reading");
                IngestOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%topic, "Ingestor stopped; dropping sensor reading");
                IngestOutcome::Dropped
            }
        }
    }

    /// Render the extraction instruction for `reading`.
    pub fn instruction_for(&self, reading: &SensorReading) -> String {
        let reading = reading.to_string();
        if self.config.instruction.contains(READING_PLACEHOLDER) {
            self.config.instruction.replace(READING_PLACEHOLDER, &reading)
        } else {
            format!("{} {}", self.config.instruction, reading)
        }
    }

    /// Decoded payloads, as they are accepted.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.echo.subscribe()
    }

    /// Run `feed` and ingest everything it delivers until shutdown.
    pub fn attach(self: &Arc<Self>, feed: Arc<dyn EventFeed>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<FeedMessage>(FEED_BUFFER);
        let cancel = self.cancel.child_token();

        let feed_cancel = cancel.clone();
        tokio::spawn(async move {
            info!(feed = feed.name(), "Feed started");
            if let Err(e) = feed.run(tx, feed_cancel).await {
                error!(feed = feed.name(), error = %e, "Feed stopped with error");
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => {
                            this.on_payload(&message.topic, &message.payload);
                        }
                        None => break,
                    },
                }
            }
            debug!("Feed delivery loop finished");
        })
    }

    /// Stop the worker and any attached feeds. Queued readings are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventIngestor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn submit_worker(
    orchestrator: SessionOrchestrator,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let instruction = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(instruction) => instruction,
                None => break,
            },
        };

        let submitted = tokio::select! {
            _ = cancel.cancelled() => break,
            result = orchestrator.submit_when_idle(instruction, Visibility::Silent) => result,
        };
        match submitted {
            Ok(ticket) => debug!(session_id = %ticket.session_id, "Submitted sensor reading"),
            Err(e) => warn!(error = %e, "Sensor reading not submitted"),
        }
    }
    debug!("Ingestor worker stopped");
}
