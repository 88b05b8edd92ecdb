//! Generation state of a conversation.

use std::fmt;

/// Whether a conversation is free to accept a new prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Generating,
}

impl SessionState {
    /// Input is enabled exactly when no generation is in flight.
    pub fn input_enabled(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_generating(&self) -> bool {
        matches!(self, SessionState::Generating)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Generating => write!(f, "generating"),
        }
    }
}
