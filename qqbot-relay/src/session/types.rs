//! Session types.

use crate::onebot::UserId;
use crate::provider::ChatMessage;
use serde::{Deserialize, Serialize};

/// Message role in a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// System message (used for compressed summaries)
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single message in a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    /// Tokens reported for the exchange; assistant messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl SessionMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            tokens: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tokens: u64) -> Self {
        Self {
            tokens: Some(tokens),
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Request form for the provider.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.as_str(), self.content.clone())
    }
}

/// Live conversation state of one user. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub persona_id: String,
    pub history: Vec<SessionMessage>,
}

impl Session {
    pub fn new(user_id: UserId, persona_id: impl Into<String>) -> Self {
        Self {
            user_id,
            persona_id: persona_id.into(),
            history: Vec::new(),
        }
    }

    /// Drop the history, keeping the persona.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Bind a persona and start a fresh conversation.
    pub fn switch_persona(&mut self, persona_id: impl Into<String>) {
        self.persona_id = persona_id.into();
        self.history.clear();
    }

    /// The newest `window` messages.
    pub fn tail(&self, window: usize) -> &[SessionMessage] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}
