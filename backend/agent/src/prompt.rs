//! Turn-delimited prompt formatting.
//!
//! Gemma-family models expect every turn wrapped as
//! `<start_of_turn>{role}\n{text}<end_of_turn>`, with generation cued by an
//! open model turn.

use edgechat_core::{Author, ChatError, Message, PromptStyle};

pub const START_TURN: &str = "<start_of_turn>";
pub const END_TURN: &str = "<end_of_turn>";
pub const USER_ROLE: &str = "user";
pub const MODEL_ROLE: &str = "model";

/// Formats user text into a model's prompt layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    start: String,
    end: String,
    user_role: String,
    model_role: String,
    reject_control_tokens: bool,
}

impl PromptTemplate {
    pub fn gemma() -> Self {
        Self {
            start: START_TURN.to_string(),
            end: END_TURN.to_string(),
            user_role: USER_ROLE.to_string(),
            model_role: MODEL_ROLE.to_string(),
            reject_control_tokens: false,
        }
    }

    pub fn for_style(style: PromptStyle) -> Self {
        match style {
            PromptStyle::Gemma => Self::gemma(),
        }
    }

    /// Reject input containing turn delimiters instead of escaping it.
    pub fn rejecting_control_tokens(mut self, reject: bool) -> Self {
        self.reject_control_tokens = reject;
        self
    }

    /// The end-of-turn marker models may echo into their output.
    pub fn end_marker(&self) -> &str {
        &self.end
    }

    fn contains_control_tokens(&self, text: &str) -> bool {
        text.contains(&self.start) || text.contains(&self.end)
    }

    /// Neutralise embedded turn delimiters so user text cannot open or close turns.
    pub fn escape(&self, text: &str) -> String {
        if !self.contains_control_tokens(text) {
            return text.to_string();
        }
        let neutralise = |marker: &str| marker.replace('<', "&lt;").replace('>', "&gt;");
        text.replace(&self.start, &neutralise(&self.start))
            .replace(&self.end, &neutralise(&self.end))
    }

    /// Wrap `text` as a user turn followed by an open model turn.
    pub fn format(&self, text: &str) -> Result<String, ChatError> {
        if self.reject_control_tokens && self.contains_control_tokens(text) {
            return Err(ChatError::InvalidPrompt(
                "input contains turn delimiter tokens".to_string(),
            ));
        }
        Ok(format!(
            "{start}{user}\n{text}{end}{start}{model}",
            start = self.start,
            end = self.end,
            user = self.user_role,
            model = self.model_role,
            text = self.escape(text),
        ))
    }

    /// Render one closed turn for context estimation.
    pub fn format_turn(&self, message: &Message) -> String {
        let role = match message.author {
            Author::Model => &self.model_role,
            Author::User | Author::External => &self.user_role,
        };
        format!(
            "{}{}\n{}{}",
            self.start,
            role,
            self.escape(&message.text),
            self.end
        )
    }

    /// Remove every end-of-turn marker from model output.
    pub fn strip_end_marker(&self, text: &str) -> String {
        text.replace(&self.end, "")
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::gemma()
    }
}
