//! MQTT event feed.
//!
//! Connects with a persistent session (`clean_session = false`) and optional
//! credentials. On every ConnAck it subscribes to the topic filter at QoS 1
//! and publishes the greeting, if one is configured. Publish payloads are
//! forwarded as raw bytes; decoding and discarding happen downstream. The
//! event loop reconnects on the poll after a failure, spaced by
//! `reconnect_delay`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{EventFeed, FeedMessage};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "edgechat";

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 16;

/// A message published once per successful connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub topic: String,
    pub message: String,
}

impl Default for Greeting {
    fn default() -> Self {
        Self {
            topic: "edgechat".to_string(),
            message: "Hello from EdgeChat!".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttFeedConfig {
    /// `host:port` of the broker; a `tcp://` prefix is accepted.
    pub address: String,
    /// Must be stable across restarts for the broker to keep the session.
    pub client_id: String,
    pub topic_filter: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub greeting: Option<Greeting>,
}

impl Default for MqttFeedConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_MQTT_PORT}"),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic_filter: "#".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            greeting: Some(Greeting::default()),
        }
    }
}

pub struct MqttFeed {
    config: MqttFeedConfig,
}

impl MqttFeed {
    pub fn new(config: MqttFeedConfig) -> Self {
        Self { config }
    }

    /// Client options for this feed's broker and session.
    pub fn options(&self) -> Result<MqttOptions> {
        let (host, port) = split_address(&self.config.address)?;
        let client_id = self.config.client_id.trim();
        if client_id.is_empty() {
            bail!("MQTT client id must not be empty");
        }

        let mut options = MqttOptions::new(client_id, host, port);
        options
            .set_keep_alive(self.config.keep_alive)
            .set_clean_session(false);
        if let Some(user) = &self.config.username {
            options.set_credentials(user.clone(), self.config.password.clone().unwrap_or_default());
        }
        Ok(options)
    }

    fn on_connected(&self, client: &AsyncClient) {
        let filter = &self.config.topic_filter;
        match client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
            Ok(()) => info!(%filter, "Subscribed to feed topic"),
            Err(e) => warn!(%filter, error = %e, "Feed subscription failed"),
        }
        if let Some(greeting) = &self.config.greeting {
            if let Err(e) = client.try_publish(
                greeting.topic.clone(),
                QoS::AtLeastOnce,
                false,
                greeting.message.clone().into_bytes(),
            ) {
                warn!(topic = %greeting.topic, error = %e, "Feed greeting failed");
            }
        }
    }

    /// Send DISCONNECT and give the event loop a moment to flush it.
    async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
        if client.try_disconnect().is_err() {
            return;
        }
        let flushed = tokio::time::timeout(Duration::from_secs(1), async {
            while let Ok(event) = eventloop.poll().await {
                if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                    break;
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("Feed disconnect not flushed");
        }
    }
}

#[async_trait]
impl EventFeed for MqttFeed {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn run(&self, tx: mpsc::Sender<FeedMessage>, cancel: CancellationToken) -> Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options()?, REQUEST_CAPACITY);
        let address = &self.config.address;
        info!(%address, client_id = %self.config.client_id, "Connecting feed");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(%address, session_present = ack.session_present, "Feed connected");
                    self.on_connected(&client);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = feed_message(&publish);
                    debug!(topic = %message.topic, bytes = message.payload.len(), "Feed message");
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%address, error = %e, "Feed connection failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                    info!(%address, "Reconnecting feed");
                }
            }
        }

        Self::disconnect(&client, &mut eventloop).await;
        Ok(())
    }
}

fn feed_message(publish: &Publish) -> FeedMessage {
    FeedMessage::new(publish.topic.clone(), publish.payload.to_vec())
}

/// `host:port`, optionally prefixed with `tcp://`.
fn split_address(address: &str) -> Result<(String, u16)> {
    let bare = address.strip_prefix("tcp://").unwrap_or(address);
    let (host, port) = bare
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected host:port, got '{address}'"))?;
    if host.is_empty() {
        bail!("missing host in '{address}'");
    }
    let port = port
        .parse()
        .with_context(|| format!("invalid port in '{address}'"))?;
    Ok((host.to_string(), port))
}
