//! Conversation documents as stored in the document store.
//!
//! ARCHITECTURE
//! ============
//! - [`head`]: the conversation head, its slot sequence and every pure
//!   mutation over it (append, delete + compaction, field patch, window).
//! - [`message`]: individual message documents and their terminal states.
//!
//! Documents serialize with camelCase field names; a boundary slot is stored
//! as the empty string.

pub mod head;
pub mod message;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use head::{ConversationHead, HeadPatch, HeadSummary, ValidationError};
pub use message::{Message, MessageId, MessageState, Role};

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Fresh time-ordered identifier (UUIDv7), so prefix listings follow creation order.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Stored workspace record: `["workspaces", ws]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub created_at: i64,
}

/// Listing view of a workspace: its heads without slot sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub heads: Vec<HeadSummary>,
    pub created_at: i64,
}
