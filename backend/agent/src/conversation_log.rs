//! Ordered, in-memory record of one conversation.
//!
//! Insertion order is the source of truth; readers get the transcript
//! newest-first. Entries with `visible == false` form the background buffer
//! used by silent submissions and never appear in [`ConversationLog::snapshot`].

use edgechat_core::{Author, Message, MessageId};

use crate::prompt::END_TURN;

#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: Vec<Message>,
    /// The message currently receiving streamed text.
    active: Option<MessageId>,
    end_marker: String,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::with_end_marker(END_TURN)
    }

    /// A log that strips `marker` from streamed model output.
    pub fn with_end_marker(marker: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            active: None,
            end_marker: marker.into(),
        }
    }

    fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        self.active = Some(id);
        id
    }

    /// Append an empty loading message and make it the active target.
    pub fn append_placeholder(&mut self, author: Author) -> MessageId {
        self.push(Message::placeholder(author))
    }

    /// Like [`append_placeholder`](Self::append_placeholder), but in the background buffer.
    pub fn append_background_placeholder(&mut self, author: Author) -> MessageId {
        self.push(Message::placeholder(author).hidden())
    }

    /// Append a fully formed message and make it the active target.
    pub fn append_complete(&mut self, text: impl Into<String>, author: Author) -> MessageId {
        self.push(Message::complete(text, author))
    }

    /// Append a fully formed message to the background buffer.
    pub fn append_hidden(&mut self, text: impl Into<String>, author: Author) -> MessageId {
        self.push(Message::complete(text, author).hidden())
    }

    /// Append streamed text to message `id` and clear its loading flag.
    ///
    /// Unknown ids are ignored: a late chunk after [`clear`](Self::clear) is
    /// not an error. Returns whether the message was found.
    pub fn append_chunk(&mut self, id: MessageId, delta: &str, done: bool) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        message.text.push_str(&delta.replace(&self.end_marker, ""));
        message.loading = false;
        if done {
            // A marker split across two chunks survives the per-chunk strip.
            if message.text.contains(&self.end_marker) {
                message.text = message.text.replace(&self.end_marker, "");
            }
            if self.active == Some(id) {
                self.active = None;
            }
        }
        true
    }

    /// Empty the log and drop the active target.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.active = None;
    }

    /// Visible transcript, newest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().rev().filter(|m| m.visible).cloned().collect()
    }

    /// Background buffer, newest first.
    pub fn background(&self) -> Vec<Message> {
        self.messages.iter().rev().filter(|m| !m.visible).cloned().collect()
    }

    /// Every entry in insertion order, visible or not.
    pub fn entries(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn active_target(&self) -> Option<MessageId> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_accumulation() {
        let mut log = ConversationLog::new();
        let id = log.append_placeholder(Author::Model);
        assert!(log.get(id).unwrap().loading);

        for delta in ["a", "b", "c<end_of_turn>"] {
            assert!(log.append_chunk(id, delta, false));
        }
        log.append_chunk(id, "", true);

        let msg = log.get(id).unwrap();
        assert_eq!(msg.text, "abc");
        assert!(!msg.loading);
        assert_eq!(log.active_target(), None);
    }

    #[test]
    fn test_marker_split_across_chunks_is_stripped() {
        let mut log = ConversationLog::new();
        let id = log.append_placeholder(Author::Model);
        log.append_chunk(id, "ok<end_of", false);
        log.append_chunk(id, "_turn>", true);
        assert_eq!(log.get(id).unwrap().text, "ok");
    }

    #[test]
    fn test_first_chunk_clears_loading() {
        let mut log = ConversationLog::new();
        let id = log.append_placeholder(Author::Model);
        log.append_chunk(id, "x", false);
        assert!(!log.get(id).unwrap().loading);
    }

    #[test]
    fn test_chunk_after_clear_is_noop() {
        let mut log = ConversationLog::new();
        let id = log.append_placeholder(Author::Model);
        log.clear();

        assert!(!log.append_chunk(id, "late", false));
        assert!(!log.append_chunk(id, "", true));
        assert!(log.is_empty());
        assert_eq!(log.active_target(), None);
    }

    #[test]
    fn test_snapshot_is_newest_first_and_hides_background() {
        let mut log = ConversationLog::new();
        let first = log.append_complete("hello", Author::User);
        let hidden = log.append_hidden("sensor prompt", Author::External);
        let reply = log.append_placeholder(Author::Model);

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, reply);
        assert_eq!(snapshot[1].id, first);

        let background = log.background();
        assert_eq!(background.len(), 1);
        assert_eq!(background[0].id, hidden);
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn test_new_entries_become_active_target() {
        let mut log = ConversationLog::new();
        let user = log.append_complete("hi", Author::User);
        assert_eq!(log.active_target(), Some(user));
        let reply = log.append_background_placeholder(Author::Model);
        assert_eq!(log.active_target(), Some(reply));
        assert!(!log.get(reply).unwrap().visible);
    }
}
