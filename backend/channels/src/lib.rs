use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod channel_feed;
pub mod ingestor;
pub mod mqtt_feed;
pub mod sensor;
pub mod topic;

pub use channel_feed::ChannelFeed;
pub use ingestor::{EventIngestor, IngestOutcome, IngestorConfig, DEFAULT_INSTRUCTION};
pub use sensor::SensorReading;
pub use mqtt_feed::{Greeting, MqttFeed, MqttFeedConfig};
pub use topic::topic_matches;

/// One payload delivered by a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// All event feeds implement this trait.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Human-readable feed name for logging.
    fn name(&self) -> &str;

    /// Deliver payloads into `tx` until cancelled or the receiver is gone.
    /// The feed owns its own connection lifecycle, reconnects included.
    async fn run(&self, tx: mpsc::Sender<FeedMessage>, cancel: CancellationToken) -> anyhow::Result<()>;
}
