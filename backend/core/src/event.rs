use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Author, MessageId};

/// Whether a generation was requested by the user or by an external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// The prompt is shown in the transcript.
    Visible,
    /// The prompt is kept out of the transcript.
    Silent,
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Notifications published by a conversation as its state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new message was appended to the log.
    MessageAppended {
        id: MessageId,
        author: Author,
        visible: bool,
    },
    /// Streamed text was appended to a message.
    MessageUpdated { id: MessageId, delta: String },
    /// A message stopped loading.
    MessageCompleted { id: MessageId },
    /// A generation began.
    GenerationStarted {
        session_id: Uuid,
        visibility: Visibility,
    },
    /// A generation reached its terminal chunk.
    GenerationFinished {
        session_id: Uuid,
        outcome: GenerationOutcome,
    },
    /// The remaining-token estimate was replaced by an exact recomputation.
    BudgetRecomputed { remaining: usize },
    /// The log was emptied.
    Cleared,
    /// A different model was installed.
    ModelSwitched { model_id: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(SessionEvent::Cleared.to_string(), "cleared");
        let event = SessionEvent::BudgetRecomputed { remaining: 10 };
        assert_eq!(event.to_string(), "budget_recomputed");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(GenerationOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["detail"], "boom");
    }
}
