/// In-process feed: forwards whatever is sent on its paired sender.
use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{EventFeed, FeedMessage};

pub struct ChannelFeed {
    rx: Mutex<Option<mpsc::Receiver<FeedMessage>>>,
}

impl ChannelFeed {
    /// Create the feed and the sender that publishes into it.
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<FeedMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl EventFeed for ChannelFeed {
    fn name(&self) -> &str {
        "channel"
    }

    async fn run(&self, tx: mpsc::Sender<FeedMessage>, cancel: CancellationToken) -> Result<()> {
        let Some(mut rx) = self.rx.lock().await.take() else {
            bail!("channel feed is already running");
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Channel feed finished");
        Ok(())
    }
}
