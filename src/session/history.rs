//! Conversation history of one session.
//!
//! Append-only and totally ordered by generation. The full history is sent to
//! the language model on every reply, so turns serialize in the chat-message
//! shape `{"role": "user", "content": "..."}`.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(rename = "content")]
    pub text: String,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Shared handle to the session's turns.
///
/// Cloned into the turn worker and each pipeline producer; only one pipeline
/// runs at a time, so appends never interleave within a turn.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Arc<RwLock<Vec<ConversationTurn>>>,
}

impl ConversationHistory {
    /// New history, seeded with a `system` turn when a prompt is configured.
    pub fn new(system_prompt: Option<&str>) -> Self {
        let history = Self::default();
        if let Some(prompt) = system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            history.append(ConversationTurn::new(Role::System, prompt));
        }
        history
    }

    pub fn append(&self, turn: ConversationTurn) {
        self.turns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(turn);
    }

    /// Copy of every turn so far, in order.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
