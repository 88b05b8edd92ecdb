use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use edgechat_agent::OrchestratorConfig;
use edgechat_channels::{Greeting, IngestorConfig, MqttFeedConfig, DEFAULT_INSTRUCTION};
use edgechat_config::defaults::{self, fill_feed_defaults};
use edgechat_config::{EdgeChatConfig, FeedConfig};
use edgechat_core::{ChatError, InferenceEngine, ModelSpec};
use edgechat_engine::{build_engine, EngineKind, ModelCatalog};

/// Runtime settings resolved from the config file, environment and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine_kind: EngineKind,
    pub base_url: String,
    pub catalog: ModelCatalog,
    pub model_id: String,
    /// Overrides every model's context window.
    pub context_tokens: Option<usize>,
    pub session: OrchestratorConfig,
    pub feed: Option<FeedSettings>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub transport: MqttFeedConfig,
    pub ingest: IngestorConfig,
}

impl Settings {
    /// Build settings from a prepared (defaulted) config.
    ///
    /// `OLLAMA_URL` overrides `engine.baseUrl`.
    pub fn from_config(config: &EdgeChatConfig) -> Result<Self> {
        let engine = config.engine.clone().unwrap_or_default();
        let session = config.session.clone().unwrap_or_default();
        let logging = config.logging.clone().unwrap_or_default();

        let engine_kind: EngineKind = engine
            .provider
            .as_deref()
            .unwrap_or(defaults::DEFAULT_PROVIDER)
            .parse()?;

        let base_url = std::env::var("OLLAMA_URL")
            .ok()
            .or(engine.base_url)
            .unwrap_or_else(|| defaults::DEFAULT_BASE_URL.to_string());

        let mut catalog = ModelCatalog::new();
        for model in &config.models {
            catalog.register(model.clone());
        }

        let model_id = engine
            .model
            .unwrap_or_else(|| defaults::DEFAULT_MODEL.to_string());

        let session = OrchestratorConfig {
            silent_replies: session.silent_replies.unwrap_or_default(),
            reject_control_tokens: session.reject_control_tokens.unwrap_or(false),
            chunk_buffer: session.chunk_buffer.unwrap_or(defaults::DEFAULT_CHUNK_BUFFER),
            event_buffer: session.event_buffer.unwrap_or(defaults::DEFAULT_EVENT_BUFFER),
        };

        Ok(Self {
            engine_kind,
            base_url,
            catalog,
            model_id,
            context_tokens: engine.context_tokens,
            session,
            feed: config.feed.clone().and_then(feed_settings),
            log_level: logging
                .level
                .unwrap_or_else(|| defaults::DEFAULT_LOG_LEVEL.to_string()),
            log_dir: logging.dir.map(PathBuf::from),
        })
    }

    /// Apply `edgechat chat` flags on top of the file settings.
    pub fn with_overrides(
        mut self,
        model: Option<String>,
        feed_address: Option<String>,
        topic: Option<String>,
    ) -> Self {
        if let Some(model) = model {
            self.model_id = model;
        }
        if feed_address.is_some() || topic.is_some() {
            let mut feed = self
                .feed
                .take()
                .map(|f| FeedConfig {
                    address: Some(f.transport.address),
                    topic: Some(f.ingest.topic_filter),
                    client_id: Some(f.transport.client_id),
                    greeting_topic: f.transport.greeting.as_ref().map(|g| g.topic.clone()),
                    greeting: Some(f.transport.greeting.map(|g| g.message).unwrap_or_default()),
                    username: f.transport.username,
                    password: f.transport.password,
                    reconnect_delay_secs: Some(f.transport.reconnect_delay.as_secs()),
                    queue_capacity: Some(f.ingest.queue_capacity),
                    instruction: Some(f.ingest.instruction),
                })
                .unwrap_or_default();
            if feed_address.is_some() {
                feed.address = feed_address;
            }
            if topic.is_some() {
                feed.topic = topic;
            }
            fill_feed_defaults(&mut feed);
            self.feed = feed_settings(feed);
        }
        self
    }

    /// Look up a model, applying the context override.
    pub fn model(&self, id: &str) -> Result<ModelSpec, ChatError> {
        let mut spec = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownModel(id.to_string()))?;
        if let Some(tokens) = self.context_tokens {
            spec.context_tokens = tokens;
        }
        Ok(spec)
    }

    pub fn engine_for(&self, spec: &ModelSpec) -> Arc<dyn InferenceEngine> {
        build_engine(self.engine_kind, Some(&self.base_url), spec)
    }
}

/// A feed section without an address means no feed.
fn feed_settings(feed: FeedConfig) -> Option<FeedSettings> {
    let address = feed.address?;
    let topic = feed
        .topic
        .unwrap_or_else(|| defaults::DEFAULT_TOPIC.to_string());
    let greeting = feed
        .greeting
        .unwrap_or_else(|| defaults::DEFAULT_GREETING.to_string());
    let greeting = (!greeting.is_empty()).then(|| Greeting {
        topic: feed
            .greeting_topic
            .unwrap_or_else(|| defaults::DEFAULT_GREETING_TOPIC.to_string()),
        message: greeting,
    });
    Some(FeedSettings {
        transport: MqttFeedConfig {
            address,
            client_id: feed
                .client_id
                .unwrap_or_else(|| defaults::DEFAULT_CLIENT_ID.to_string()),
            topic_filter: topic.clone(),
            username: feed.username,
            password: feed.password,
            reconnect_delay: Duration::from_secs(
                feed.reconnect_delay_secs
                    .unwrap_or(defaults::DEFAULT_RECONNECT_DELAY_SECS),
            ),
            greeting,
            ..Default::default()
        },
        ingest: IngestorConfig {
            topic_filter: topic,
            queue_capacity: feed
                .queue_capacity
                .unwrap_or(defaults::DEFAULT_QUEUE_CAPACITY),
            instruction: feed
                .instruction
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgechat_config::{apply_all_defaults, EngineConfig};
    use edgechat_core::SilentReplyPolicy;

    fn prepared(config: EdgeChatConfig) -> Settings {
        Settings::from_config(&apply_all_defaults(config)).unwrap()
    }

    #[test]
    fn defaults_resolve_to_gemma_without_feed() {
        let settings = prepared(EdgeChatConfig::default());
        assert_eq!(settings.model_id, defaults::DEFAULT_MODEL);
        assert_eq!(settings.engine_kind, EngineKind::Ollama);
        assert_eq!(settings.session.silent_replies, SilentReplyPolicy::Transcript);
        assert!(settings.feed.is_none());
        assert_eq!(settings.model(&settings.model_id).unwrap().context_tokens, 1024);
    }

    #[test]
    fn context_override_applies_to_models() {
        let settings = prepared(EdgeChatConfig {
            engine: Some(EngineConfig {
                provider: Some("mock".to_string()),
                context_tokens: Some(4096),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(settings.engine_kind, EngineKind::Mock);
        assert_eq!(settings.model(&settings.model_id).unwrap().context_tokens, 4096);
        assert!(matches!(
            settings.model("missing"),
            Err(ChatError::UnknownModel(_))
        ));
    }

    #[test]
    fn flags_enable_feed() {
        let settings = prepared(EdgeChatConfig::default()).with_overrides(
            None,
            Some("broker.local:1883".to_string()),
            Some("sensors/+".to_string()),
        );
        let feed = settings.feed.unwrap();
        assert_eq!(feed.transport.address, "broker.local:1883");
        assert_eq!(feed.transport.client_id, defaults::DEFAULT_CLIENT_ID);
        assert_eq!(
            feed.transport.greeting.as_ref().map(|g| g.message.as_str()),
            Some(defaults::DEFAULT_GREETING)
        );
        assert_eq!(feed.transport.topic_filter, "sensors/+");
        assert_eq!(feed.ingest.topic_filter, "sensors/+");
        assert_eq!(feed.ingest.queue_capacity, defaults::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn empty_greeting_disables_it() {
        let settings = prepared(EdgeChatConfig {
            feed: Some(FeedConfig {
                address: Some("broker.local:1883".to_string()),
                greeting: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let feed = settings.feed.unwrap();
        assert!(feed.transport.greeting.is_none());
        assert!(!feed.transport.topic_filter.is_empty());
    }

    #[test]
    fn topic_flag_alone_keeps_feed_disabled() {
        let settings = prepared(EdgeChatConfig::default()).with_overrides(
            Some("other".to_string()),
            None,
            Some("sensors/#".to_string()),
        );
        assert!(settings.feed.is_none());
        assert_eq!(settings.model_id, "other");
    }
}
