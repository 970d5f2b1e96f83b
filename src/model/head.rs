//! Conversation head: `["heads", ws, chat]`.
//!
//! DESIGN
//! ======
//! The head owns the ordered slot sequence of a conversation. A slot is a
//! message reference or a boundary marker ("context resets here"). All
//! functions here are pure with respect to the store: they mutate a detached
//! value that the concurrency controller later commits as a whole document.
//!
//! INVARIANTS
//! ==========
//! After any mutation that touches `slots`:
//! - no two boundaries are adjacent;
//! - the sequence does not end with a boundary;
//! - the sequence does not start with a boundary once compacted (a leading
//!   boundary resets nothing).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::message::MessageId;
use super::{new_id, now_ms};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const MAX_TURN_TEXT_CHARS: usize = 16_384;

// =============================================================================
// SLOTS
// =============================================================================

/// One entry of the head's ordered sequence. Stored as the message id, or as
/// `""` for a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Slot {
    Boundary,
    Message(MessageId),
}

impl Slot {
    #[must_use]
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::Boundary)
    }

    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Boundary => None,
            Self::Message(id) => Some(id),
        }
    }
}

impl From<String> for Slot {
    fn from(raw: String) -> Self {
        MessageId::parse(&raw).map_or(Self::Boundary, Self::Message)
    }
}

impl From<Slot> for String {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Boundary => String::new(),
            Slot::Message(id) => id.as_str().to_string(),
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Malformed mutation input. Always raised before any store access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid title: must not be empty")]
    EmptyTitle,
    #[error("invalid systemPrompt: must not be empty")]
    EmptySystemPrompt,
    #[error("invalid deletedMessages: ids must not be empty")]
    EmptyMessageId,
    #[error("invalid backend: {0} is not available")]
    UnknownBackend(String),
    #[error("invalid text: must not be empty")]
    EmptyText,
    #[error("invalid text: length {len} exceeds the limit of {max}")]
    TextTooLong { len: usize, max: usize },
}

impl crate::error::ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyTitle => "E_INVALID_TITLE",
            Self::EmptySystemPrompt => "E_INVALID_SYSTEM_PROMPT",
            Self::EmptyMessageId => "E_INVALID_DELETED_MESSAGES",
            Self::UnknownBackend(_) => "E_INVALID_BACKEND",
            Self::EmptyText | Self::TextTooLong { .. } => "E_INVALID_TEXT",
        }
    }
}

/// Check the text of a new user turn.
///
/// # Errors
///
/// `EmptyText` or `TextTooLong`.
pub fn validate_turn_text(text: &str) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    // Measured in UTF-16 code units.
    let len = text.encode_utf16().count();
    if len > MAX_TURN_TEXT_CHARS {
        return Err(ValidationError::TextTooLong { len, max: MAX_TURN_TEXT_CHARS });
    }
    Ok(())
}

// =============================================================================
// HEAD
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHead {
    pub id: String,
    /// Explicit backend; the process default applies when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub title: String,
    pub system_prompt: String,
    /// Last-modified time, ms since epoch.
    pub timestamp: i64,
    /// Stored under `messages`, the field name observers read.
    #[serde(default, rename = "messages")]
    pub slots: Vec<Slot>,
}

/// Head fields without the slot sequence, for workspace listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub title: String,
    pub system_prompt: String,
    pub timestamp: i64,
}

impl From<ConversationHead> for HeadSummary {
    fn from(head: ConversationHead) -> Self {
        Self {
            id: head.id,
            backend: head.backend,
            title: head.title,
            system_prompt: head.system_prompt,
            timestamp: head.timestamp,
        }
    }
}

/// Ids minted by [`ConversationHead::append_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub user: MessageId,
    pub assistant: MessageId,
}

impl ConversationHead {
    /// A fresh conversation with default title and prompt and no slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: new_id(),
            backend: None,
            title: DEFAULT_TITLE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timestamp: now_ms(),
            slots: Vec::new(),
        }
    }

    /// Append a user slot and an assistant slot, optionally after a boundary.
    ///
    /// The boundary is skipped when the sequence already ends in one.
    pub fn append_turn(&mut self, start_boundary: bool) -> NewTurn {
        let turn = NewTurn { user: MessageId::generate(), assistant: MessageId::generate() };
        self.push_turn(start_boundary, &turn);
        turn
    }

    /// [`append_turn`](Self::append_turn) with caller-chosen ids.
    pub fn push_turn(&mut self, start_boundary: bool, turn: &NewTurn) {
        if start_boundary && !self.slots.last().is_some_and(Slot::is_boundary) {
            self.slots.push(Slot::Boundary);
        }
        self.slots.push(Slot::Message(turn.user.clone()));
        self.slots.push(Slot::Message(turn.assistant.clone()));
    }

    /// Drop every slot referencing one of `ids`, then compact boundaries.
    pub fn remove_messages(&mut self, ids: &HashSet<MessageId>) {
        self.slots
            .retain(|slot| slot.message_id().is_none_or(|id| !ids.contains(id)));
        compact(&mut self.slots);
    }

    /// Apply a validated patch. Validation happens in [`HeadPatch::validate`].
    pub fn apply_patch(&mut self, patch: &HeadPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(system_prompt) = &patch.system_prompt {
            self.system_prompt.clone_from(system_prompt);
        }
        if let Some(deleted) = &patch.deleted_messages {
            let ids = deleted
                .iter()
                .filter_map(|raw| MessageId::parse(raw))
                .collect::<HashSet<_>>();
            self.remove_messages(&ids);
        }
        if let Some(backend) = &patch.backend {
            self.backend = Some(backend.clone());
        }
    }

    /// Whether any slot references `id`.
    #[must_use]
    pub fn references(&self, id: &MessageId) -> bool {
        self.slots.iter().any(|slot| slot.message_id() == Some(id))
    }

    /// Every referenced message id, in sequence order.
    pub fn message_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.slots.iter().filter_map(Slot::message_id)
    }

    /// Message ids after the last boundary, in sequence order.
    #[must_use]
    pub fn active_window(&self) -> Vec<MessageId> {
        let start = self
            .slots
            .iter()
            .rposition(Slot::is_boundary)
            .map_or(0, |idx| idx + 1);
        self.slots[start..]
            .iter()
            .filter_map(Slot::message_id)
            .cloned()
            .collect()
    }
}

impl Default for ConversationHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse adjacent boundaries (a leading one included), then trim trailing ones.
fn compact(slots: &mut Vec<Slot>) {
    let mut previous_was_boundary = true;
    slots.retain(|slot| {
        let keep = !(slot.is_boundary() && previous_was_boundary);
        previous_was_boundary = slot.is_boundary();
        keep
    });
    while slots.last().is_some_and(Slot::is_boundary) {
        slots.pop();
    }
}

// =============================================================================
// PATCH
// =============================================================================

/// Field-level edit of a head. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadPatch {
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub deleted_messages: Option<Vec<String>>,
    pub backend: Option<String>,
}

impl HeadPatch {
    /// Reject malformed input. `is_available` answers whether a backend id exists.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] found, checked field by field.
    pub fn validate(&self, is_available: impl Fn(&str) -> bool) -> Result<(), ValidationError> {
        if self.title.as_deref().is_some_and(str::is_empty) {
            return Err(ValidationError::EmptyTitle);
        }
        if self.system_prompt.as_deref().is_some_and(str::is_empty) {
            return Err(ValidationError::EmptySystemPrompt);
        }
        if self
            .deleted_messages
            .as_ref()
            .is_some_and(|ids| ids.iter().any(String::is_empty))
        {
            return Err(ValidationError::EmptyMessageId);
        }
        if let Some(backend) = &self.backend {
            if !is_available(backend) {
                return Err(ValidationError::UnknownBackend(backend.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "head_test.rs"]
mod tests;
