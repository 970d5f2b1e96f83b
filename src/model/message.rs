//! Message documents: `["messages", ws, id]`.
//!
//! LIFECYCLE
//! =========
//! User messages are born complete. Assistant messages are born with empty
//! text and `completed = false`, are rewritten only by their own generation
//! task, and become `completed = true` exactly once. `interrupted` tells a cut
//! short reply apart from a normal finish.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{new_id, now_ms};

/// Non-empty message identifier. Unique within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn generate() -> Self {
        Self(new_id())
    }

    /// `None` for the empty string, which is reserved for boundary slots.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        (!raw.is_empty()).then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// What an observer should display for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Streaming,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    /// Backend that produced the reply; set once generation picks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub text: String,
    /// Advanced on every partial write.
    pub timestamp: i64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl Message {
    #[must_use]
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            backend: None,
            text: text.into(),
            timestamp: now_ms(),
            completed: true,
            interrupted: false,
        }
    }

    /// Empty, incomplete reply slot awaiting generation.
    #[must_use]
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            backend: None,
            text: String::new(),
            timestamp: now_ms(),
            completed: false,
            interrupted: false,
        }
    }

    /// Terminal fallback: keep whatever text exists, mark cut short.
    pub fn finalize_interrupted(&mut self) {
        self.completed = true;
        self.interrupted = true;
        self.timestamp = now_ms();
    }

    /// Observer-side state. An incomplete reply that has not advanced within
    /// `staleness` is presumed interrupted before its task finalizes it.
    #[must_use]
    pub fn display_state(&self, now_ms: i64, staleness: Duration) -> MessageState {
        if self.interrupted {
            return MessageState::Interrupted;
        }
        if self.completed {
            return MessageState::Completed;
        }
        let staleness_ms = i64::try_from(staleness.as_millis()).unwrap_or(i64::MAX);
        if now_ms.saturating_sub(self.timestamp) > staleness_ms {
            MessageState::Interrupted
        } else {
            MessageState::Streaming
        }
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
