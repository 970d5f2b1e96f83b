//! Chat service: conversation lifecycle and turn posting.
//!
//! DESIGN
//! ======
//! Every head change goes through the optimistic concurrency controller in
//! [`super::mutate`]. Posting a turn commits the updated head together with
//! both new message documents in one atomic batch, then hands the reply to
//! the generation supervisor; the request never waits for generation.
//!
//! ERROR HANDLING
//! ==============
//! Validation runs before any store access. A lost commit race surfaces as
//! `Conflict` (retryable) and nothing is written.

use serde::{Deserialize, Serialize};

use crate::model::{ConversationHead, HeadPatch, Message, ValidationError, head::validate_turn_text};
use crate::services::feed::{ChatSnapshot, RenderedMessage};
use crate::services::generation::GenerationJob;
use crate::services::messages;
use crate::services::mutate::{self, HeadDraft, MutateError};
use crate::services::workspace::workspace_exists;
use crate::state::AppState;
use crate::store::{AtomicWrite, DocumentStore, Key, StoreError, set_json};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("conflicting update, please retry")]
    Conflict,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::error::ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::WorkspaceNotFound(_) => "E_WORKSPACE_NOT_FOUND",
            Self::ChatNotFound(_) => "E_CHAT_NOT_FOUND",
            Self::MessageNotFound(_) => "E_MESSAGE_NOT_FOUND",
            Self::Conflict => "E_CONFLICT",
            Self::Validation(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Conflict => true,
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

impl ChatError {
    fn from_mutate(err: MutateError, chat_id: &str) -> Self {
        match err {
            MutateError::Conflict(_) => Self::Conflict,
            MutateError::NotFound(_) => Self::ChatNotFound(chat_id.to_string()),
            MutateError::Store(e) => Self::Store(e),
        }
    }
}

/// Body of a turn post.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub text: String,
    /// Start a fresh context before this turn.
    #[serde(default)]
    pub boundary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnAccepted {
    pub ok: bool,
    pub user_message_id: String,
    pub assistant_message_id: String,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Create a conversation with default title and prompt.
///
/// # Errors
///
/// `WorkspaceNotFound` if the workspace record is absent.
pub async fn create_chat(store: &dyn DocumentStore, workspace_id: &str) -> Result<ConversationHead, ChatError> {
    if !workspace_exists(store, workspace_id).await? {
        return Err(ChatError::WorkspaceNotFound(workspace_id.to_string()));
    }
    let head = ConversationHead::new();
    set_json(store, &Key::head(workspace_id, &head.id), &head).await?;
    tracing::info!(%workspace_id, chat_id = %head.id, "chat created");
    Ok(head)
}

/// Full conversation view: head, every referenced message rendered, and the
/// available backends.
///
/// # Errors
///
/// `ChatNotFound` if the head is absent.
pub async fn load_chat(state: &AppState, workspace_id: &str, chat_id: &str) -> Result<ChatSnapshot, ChatError> {
    let head: ConversationHead = state
        .store
        .get(&Key::head(workspace_id, chat_id))
        .await?
        .decode()?
        .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;

    let ids: Vec<_> = head.message_ids().cloned().collect();
    let staleness = state.config.feed.staleness;
    let messages = messages::batch_load(state.store.as_ref(), workspace_id, &ids)
        .await?
        .into_iter()
        .map(|m| RenderedMessage::new(m, staleness))
        .collect();

    Ok(ChatSnapshot { head: Some(head), messages, available_backends: state.backends.list_available() })
}

/// Remove the head. Message documents are left in place.
///
/// # Errors
///
/// Returns a store error.
pub async fn delete_chat(store: &dyn DocumentStore, workspace_id: &str, chat_id: &str) -> Result<(), ChatError> {
    store.delete(&Key::head(workspace_id, chat_id)).await?;
    tracing::info!(%workspace_id, %chat_id, "chat deleted");
    Ok(())
}

/// Apply a validated field patch to the head.
///
/// # Errors
///
/// `Validation` before any store access; `ChatNotFound` or `Conflict` from
/// the commit.
pub async fn patch_chat(
    state: &AppState,
    workspace_id: &str,
    chat_id: &str,
    patch: HeadPatch,
) -> Result<ConversationHead, ChatError> {
    patch.validate(|name| state.backends.is_available(name))?;
    let key = Key::head(workspace_id, chat_id);
    mutate::mutate(state.store.as_ref(), &key, |head| head.apply_patch(&patch))
        .await
        .map_err(|e| ChatError::from_mutate(e, chat_id))
}

// =============================================================================
// TURNS
// =============================================================================

/// Append a user turn and start generating the reply.
///
/// # Errors
///
/// `Validation` for bad text, `ChatNotFound` if the head is absent,
/// `Conflict` if the head changed between read and commit.
pub async fn post_turn(
    state: &AppState,
    workspace_id: &str,
    chat_id: &str,
    request: TurnRequest,
) -> Result<TurnAccepted, ChatError> {
    validate_turn_text(&request.text)?;

    let key = Key::head(workspace_id, chat_id);
    let mut draft = HeadDraft::read(state.store.as_ref(), &key)
        .await
        .map_err(|e| ChatError::from_mutate(e, chat_id))?;
    let turn = draft.head.append_turn(request.boundary);

    let user = Message::user(turn.user.clone(), request.text);
    let assistant = Message::assistant_placeholder(turn.assistant.clone());
    let extra = AtomicWrite::new()
        .set(Key::message(workspace_id, turn.user.as_str()), &user)?
        .set(Key::message(workspace_id, turn.assistant.as_str()), &assistant)?;

    let head = draft
        .commit_with(state.store.as_ref(), extra)
        .await
        .map_err(|e| ChatError::from_mutate(e, chat_id))?;

    tracing::info!(
        %workspace_id,
        %chat_id,
        user_message_id = %turn.user,
        assistant_message_id = %turn.assistant,
        boundary = request.boundary,
        "turn accepted"
    );

    state.generations.spawn(GenerationJob {
        workspace_id: workspace_id.to_string(),
        chat_id: chat_id.to_string(),
        head,
        assistant,
    });

    Ok(TurnAccepted {
        ok: true,
        user_message_id: turn.user.to_string(),
        assistant_message_id: turn.assistant.to_string(),
    })
}

// =============================================================================
// MESSAGES
// =============================================================================

/// One rendered message.
///
/// # Errors
///
/// `MessageNotFound` if absent.
pub async fn get_message(state: &AppState, workspace_id: &str, message_id: &str) -> Result<RenderedMessage, ChatError> {
    let message = messages::load(state.store.as_ref(), workspace_id, message_id)
        .await?
        .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
    Ok(RenderedMessage::new(message, state.config.feed.staleness))
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
