//! Structured logging for EdgeChat.
//!
//! Handles subscriber setup (console plus rolling NDJSON file), redaction,
//! and transcript event logging.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger, TranscriptEvent};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
