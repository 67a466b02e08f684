use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;
use crate::persona::GREETING;

/// Append-only transcript of one user session.
///
/// A fresh or cleared session always starts with the assistant greeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: vec![ChatMessage::assistant(GREETING)],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn trailing(&self, count: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Drops everything but the last `count` messages.
    pub fn truncate_to_trailing(&mut self, count: usize) {
        let start = self.messages.len().saturating_sub(count);
        if start > 0 {
            self.messages.drain(..start);
            self.updated_at = Utc::now();
        }
    }

    pub fn clear(&mut self) {
        self.messages = vec![ChatMessage::assistant(GREETING)];
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}
