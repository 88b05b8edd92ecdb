//! Transcript Event Logger
//!
//! Structured conversation events (prompts, replies, feed payloads, errors)
//! written through `tracing` under the `transcript_events` target.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum TranscriptEvent {
    Prompt {
        silent: bool,
        text: String,
    },
    Reply {
        text: String,
    },
    Rejected {
        reason: String,
    },
    FeedPayload {
        topic: String,
        payload: String,
    },
    Error {
        error_msg: String,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: TranscriptEvent,
}

pub struct EventLogger;

impl EventLogger {
    /// Redact and emit one transcript event.
    pub fn log_event(session_id: &str, event: TranscriptEvent) {
        let entry = Self::entry(session_id, event);
        let json = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: "transcript_events", session_id = %entry.session_id, event = %json, "Transcript event");
    }

    fn entry(session_id: &str, mut event: TranscriptEvent) -> EventLogEntry {
        match &mut event {
            TranscriptEvent::Prompt { text, .. } | TranscriptEvent::Reply { text } => {
                *text = redact_sensitive_data(text);
            }
            TranscriptEvent::Rejected { reason } => {
                *reason = redact_sensitive_data(reason);
            }
            TranscriptEvent::FeedPayload { payload, .. } => {
                *payload = redact_sensitive_data(payload);
            }
            TranscriptEvent::Error { error_msg } => {
                *error_msg = redact_sensitive_data(error_msg);
            }
        }

        EventLogEntry {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}
