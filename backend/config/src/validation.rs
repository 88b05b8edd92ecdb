//! Config validation: schema checks with user-friendly error messages.

use crate::schema::EdgeChatConfig;
use thiserror::Error;

const KNOWN_PROVIDERS: &[&str] = &["ollama", "mock"];
const KNOWN_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &EdgeChatConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_engine(config, &mut report);
    validate_session(config, &mut report);
    validate_feed(config, &mut report);
    validate_logging(config, &mut report);
    validate_models(config, &mut report);
    report
}

fn validate_engine(config: &EdgeChatConfig, report: &mut ValidationReport) {
    let Some(engine) = &config.engine else { return };
    if let Some(provider) = &engine.provider {
        if !KNOWN_PROVIDERS.contains(&provider.to_ascii_lowercase().as_str()) {
            report.error(
                "engine.provider",
                format!("Unknown provider '{provider}'. Use 'ollama' or 'mock'"),
            );
        }
    }
    if let Some(url) = &engine.base_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            report.error("engine.baseUrl", "baseUrl must start with http:// or https://");
        }
    }
    if engine.context_tokens == Some(0) {
        report.error("engine.contextTokens", "contextTokens must be > 0");
    }
}

fn validate_session(config: &EdgeChatConfig, report: &mut ValidationReport) {
    let Some(session) = &config.session else { return };
    if session.chunk_buffer == Some(0) {
        report.error("session.chunkBuffer", "chunkBuffer must be >= 1");
    }
    if session.event_buffer == Some(0) {
        report.error("session.eventBuffer", "eventBuffer must be >= 1");
    }
}

fn validate_feed(config: &EdgeChatConfig, report: &mut ValidationReport) {
    let Some(feed) = &config.feed else { return };
    if let Some(address) = &feed.address {
        let port_ok = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            report.error("feed.address", format!("Expected host:port, got '{address}'"));
        }
    }
    if feed.client_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        report.error("feed.clientId", "clientId must not be empty");
    }
    if feed.password.is_some() && feed.username.is_none() {
        report.warn("feed.password", "password is ignored without a username");
    }
    if feed.queue_capacity == Some(0) {
        report.error("feed.queueCapacity", "queueCapacity must be >= 1");
    }
    if let Some(instruction) = &feed.instruction {
        if !instruction.contains("{reading}") {
            report.warn(
                "feed.instruction",
                "instruction has no {reading} placeholder; the reading will be appended",
            );
        }
    }
}

fn validate_logging(config: &EdgeChatConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        if !KNOWN_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            report.warn("logging.level", format!("Unknown level '{level}'; falling back to info"));
        }
    }
}

fn validate_models(config: &EdgeChatConfig, report: &mut ValidationReport) {
    for (i, model) in config.models.iter().enumerate() {
        if model.id.trim().is_empty() {
            report.error(format!("models[{i}].id"), "Model id cannot be empty");
        }
        if model.context_tokens == 0 {
            report.error(format!("models[{i}].contextTokens"), "contextTokens must be > 0");
        }
    }
}
