//! Transcript: the ordered message history of one session

use crate::error::{Error, Result};
use crate::provider::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered message history, append-only except when compacted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[system, user(brief)]`
    pub fn seeded(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The leading system message, if any
    pub fn system(&self) -> Option<&ChatMessage> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// Total tool calls requested by assistant turns
    pub fn tool_call_count(&self) -> usize {
        self.messages.iter().map(|m| m.calls().len()).sum()
    }

    /// Every tool message must answer a call of the nearest preceding
    /// assistant message, and each call is answered at most once. Call ids
    /// only need to be unique within one assistant turn.
    pub fn check_tool_pairing(&self) -> Result<()> {
        let mut issued: HashSet<&str> = HashSet::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for (i, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Assistant => {
                    issued = message.calls().iter().map(|c| c.id.as_str()).collect();
                    answered.clear();
                }
                Role::Tool => {
                    let id = message.tool_call_id.as_deref().unwrap_or("");
                    if !issued.contains(id) {
                        return Err(Error::unexpected(format!(
                            "tool message at index {} answers unknown call '{}'",
                            i, id
                        ))
                        .with_operation("transcript::check_tool_pairing"));
                    }
                    if !answered.insert(id) {
                        return Err(Error::unexpected(format!(
                            "tool call '{}' answered twice (index {})",
                            id, i
                        ))
                        .with_operation("transcript::check_tool_pairing"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl From<Vec<ChatMessage>> for Transcript {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::from_messages(messages)
    }
}
