//! Config defaults: applies default values to parsed config.

use crate::schema::{EdgeChatConfig, EngineConfig, FeedConfig, LoggingConfig, SessionConfig};
use edgechat_core::SilentReplyPolicy;

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3-1b-it-gpu";

pub const DEFAULT_CHUNK_BUFFER: usize = 64;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

pub const DEFAULT_TOPIC: &str = "#";
pub const DEFAULT_CLIENT_ID: &str = "edgechat";
pub const DEFAULT_GREETING_TOPIC: &str = "edgechat";
pub const DEFAULT_GREETING: &str = "Hello from EdgeChat!";
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: EdgeChatConfig) -> EdgeChatConfig {
    let config = apply_engine_defaults(config);
    let config = apply_session_defaults(config);
    let config = apply_feed_defaults(config);
    apply_logging_defaults(config)
}

fn apply_engine_defaults(mut config: EdgeChatConfig) -> EdgeChatConfig {
    let engine = config.engine.get_or_insert_with(EngineConfig::default);
    engine.provider.get_or_insert_with(|| DEFAULT_PROVIDER.to_string());
    engine.base_url.get_or_insert_with(|| DEFAULT_BASE_URL.to_string());
    engine.model.get_or_insert_with(|| DEFAULT_MODEL.to_string());
    config
}

fn apply_session_defaults(mut config: EdgeChatConfig) -> EdgeChatConfig {
    let session = config.session.get_or_insert_with(SessionConfig::default);
    session.silent_replies.get_or_insert(SilentReplyPolicy::Transcript);
    session.chunk_buffer.get_or_insert(DEFAULT_CHUNK_BUFFER);
    session.event_buffer.get_or_insert(DEFAULT_EVENT_BUFFER);
    session.reject_control_tokens.get_or_insert(false);
    config
}

/// Feed defaults apply only when a feed section exists.
fn apply_feed_defaults(mut config: EdgeChatConfig) -> EdgeChatConfig {
    if let Some(feed) = &mut config.feed {
        fill_feed_defaults(feed);
    }
    config
}

/// Fill unset feed fields; also used when a feed is requested on the command line.
pub fn fill_feed_defaults(feed: &mut FeedConfig) {
    feed.topic.get_or_insert_with(|| DEFAULT_TOPIC.to_string());
    feed.client_id.get_or_insert_with(|| DEFAULT_CLIENT_ID.to_string());
    feed.greeting_topic.get_or_insert_with(|| DEFAULT_GREETING_TOPIC.to_string());
    feed.greeting.get_or_insert_with(|| DEFAULT_GREETING.to_string());
    feed.reconnect_delay_secs.get_or_insert(DEFAULT_RECONNECT_DELAY_SECS);
    feed.queue_capacity.get_or_insert(DEFAULT_QUEUE_CAPACITY);
}

fn apply_logging_defaults(mut config: EdgeChatConfig) -> EdgeChatConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    config
}
