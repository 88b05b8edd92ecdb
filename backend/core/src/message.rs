use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a message in the conversation log.
pub type MessageId = Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// Typed by the person using the chat.
    User,
    /// Generated by the language model.
    Model,
    /// Synthesised from an external event feed.
    External,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Author::User => "user",
            Author::Model => "model",
            Author::External => "external",
        };
        write!(f, "{}", s)
    }
}

/// One entry in the conversation.
///
/// Created either complete or as a `loading` placeholder that is then filled
/// in place as chunks stream in. `visible` is false for entries that belong to
/// the background buffer (silent prompts and, depending on policy, their
/// replies) and are never shown in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    pub text: String,
    pub loading: bool,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// An empty, loading message awaiting streamed text.
    pub fn placeholder(author: Author) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            text: String::new(),
            loading: true,
            visible: true,
            created_at: Utc::now(),
        }
    }

    /// A fully formed message.
    pub fn complete(text: impl Into<String>, author: Author) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            text: text.into(),
            loading: false,
            visible: true,
            created_at: Utc::now(),
        }
    }

    /// Move this message into the background buffer.
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_loading_and_empty() {
        let msg = Message::placeholder(Author::Model);
        assert!(msg.loading);
        assert!(msg.visible);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn test_complete_and_hidden() {
        let msg = Message::complete("hi", Author::External).hidden();
        assert!(!msg.loading);
        assert!(!msg.visible);
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn test_author_display() {
        assert_eq!(Author::External.to_string(), "external");
        assert_eq!(Author::Model.to_string(), "model");
    }
}
