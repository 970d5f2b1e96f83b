//! Generation service: stream one assistant reply into its message document.
//!
//! DESIGN
//! ======
//! One task per reply. The task owns the assistant message exclusively: no
//! other writer touches it while it is incomplete. Streamed chunks accumulate
//! in a local copy and are persisted with at most one write in flight; chunks
//! that arrive while a write is outstanding are folded into the next write.
//!
//! Every persistence write is followed by a fresh read of the head. When the
//! head no longer references the assistant message (deleted by an edit, or
//! the whole conversation removed) the task stops at its next iteration and
//! drops the backend stream, which aborts the upstream request. The head is
//! never locked; a cancelled reply may receive one extra write.
//!
//! A liveness check re-reads the head on a fixed period while no write is in
//! flight, so a deletion is noticed even when the backend goes quiet.
//!
//! ERROR HANDLING
//! ==============
//! Nothing escapes the task. Backend resolution failures, stream errors,
//! timeouts and cancellation all resolve to a terminal message with
//! `completed = true, interrupted = true` and whatever text had arrived.
//! Store errors during partial writes are logged and the content is retried
//! on the next write; the final flush is always attempted.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::GenerationConfig;
use crate::llm::{BackendRegistry, ChatMessage, TokenChunk};
use crate::model::{ConversationHead, Message, MessageId, Role, now_ms};
use crate::services::messages;
use crate::store::{DocumentStore, Key, StoreError, set_json};

// =============================================================================
// TYPES
// =============================================================================

/// Everything a generation task needs, captured when the turn commits.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub workspace_id: String,
    pub chat_id: String,
    /// Head as committed together with the placeholder.
    pub head: ConversationHead,
    /// The incomplete assistant placeholder.
    pub assistant: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// Neither the head nor the process names a registered backend.
    BackendUnavailable,
    /// The backend rejected the request before streaming.
    StartFailed,
    /// The assistant message is no longer referenced by the head.
    Cancelled,
    TimedOut,
    /// The backend stream yielded an error.
    StreamFailed,
    /// The stream ended without a finish reason.
    StreamEnded,
    /// The generation context could not be loaded.
    ContextUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Interrupted(InterruptReason),
}

/// Keys the task writes and checks.
#[derive(Debug, Clone)]
struct Target {
    head_key: Key,
    message_key: Key,
    assistant_id: MessageId,
}

type PendingWrite = BoxFuture<'static, Result<bool, StoreError>>;

// =============================================================================
// CONTEXT
// =============================================================================

/// System prompt plus every message in the head's active window, excluding
/// `pending` (the reply being generated).
///
/// # Errors
///
/// Returns a store error if the window's messages cannot be loaded.
pub async fn build_context(
    store: &dyn DocumentStore,
    workspace_id: &str,
    head: &ConversationHead,
    pending: &MessageId,
) -> Result<Vec<ChatMessage>, StoreError> {
    let window: Vec<MessageId> = head
        .active_window()
        .into_iter()
        .filter(|id| id != pending)
        .collect();

    let mut context = Vec::with_capacity(window.len() + 1);
    context.push(ChatMessage::system(head.system_prompt.clone()));
    for message in messages::batch_load(store, workspace_id, &window).await? {
        context.push(match message.role {
            Role::User => ChatMessage::user(message.text),
            Role::Assistant => ChatMessage::assistant(message.text),
        });
    }
    Ok(context)
}

// =============================================================================
// LOOP
// =============================================================================

/// Run one generation to its terminal state. Never fails.
pub async fn run_generation(
    store: Arc<dyn DocumentStore>,
    backends: Arc<BackendRegistry>,
    config: GenerationConfig,
    job: GenerationJob,
) -> GenerationOutcome {
    let GenerationJob { workspace_id, chat_id, head, mut assistant } = job;
    let target = Target {
        head_key: Key::head(&workspace_id, &chat_id),
        message_key: Key::message(&workspace_id, assistant.id.as_str()),
        assistant_id: assistant.id.clone(),
    };
    let message_id = assistant.id.clone();

    let outcome = stream_reply(&store, &backends, config, &workspace_id, &head, &target, &mut assistant).await;

    // PHASE: FINAL FLUSH
    match outcome {
        GenerationOutcome::Completed => {
            assistant.completed = true;
            assistant.interrupted = false;
        }
        GenerationOutcome::Interrupted(_) => assistant.finalize_interrupted(),
    }
    if let Err(e) = set_json(store.as_ref(), &target.message_key, &assistant).await {
        tracing::error!(error = %e, %workspace_id, %chat_id, %message_id, "generation: final flush failed");
    }

    info!(
        %workspace_id,
        %chat_id,
        %message_id,
        backend = assistant.backend.as_deref().unwrap_or("-"),
        ?outcome,
        chars = assistant.text.chars().count(),
        "generation: finished"
    );
    outcome
}

/// Drive the backend stream, mutating `assistant` in place. The caller
/// performs the terminal write.
async fn stream_reply(
    store: &Arc<dyn DocumentStore>,
    backends: &BackendRegistry,
    config: GenerationConfig,
    workspace_id: &str,
    head: &ConversationHead,
    target: &Target,
    assistant: &mut Message,
) -> GenerationOutcome {
    let deadline = Instant::now() + config.timeout;

    // PHASE: CONTEXT
    let context = match build_context(store.as_ref(), workspace_id, head, &target.assistant_id).await {
        Ok(context) => context,
        Err(e) => {
            warn!(error = %e, message_id = %target.assistant_id, "generation: context load failed");
            return GenerationOutcome::Interrupted(InterruptReason::ContextUnavailable);
        }
    };

    // PHASE: BACKEND
    let Some((backend_name, backend)) = backends.resolve(head.backend.as_deref()) else {
        warn!(
            requested = head.backend.as_deref().unwrap_or("-"),
            message_id = %target.assistant_id,
            "generation: no backend available"
        );
        return GenerationOutcome::Interrupted(InterruptReason::BackendUnavailable);
    };
    assistant.backend = Some(backend_name.clone());
    info!(
        backend = %backend_name,
        message_id = %target.assistant_id,
        context_len = context.len(),
        "generation: started"
    );

    let mut stream = match tokio::time::timeout_at(deadline, backend.stream_chat(&context)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, backend = %backend_name, "generation: backend request failed");
            return GenerationOutcome::Interrupted(InterruptReason::StartFailed);
        }
        Err(_) => return GenerationOutcome::Interrupted(InterruptReason::TimedOut),
    };

    // PHASE: STREAM
    let timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(timeout);
    let period = config.liveness_interval;
    let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut in_flight: Option<PendingWrite> = None;
    let mut dirty = false;
    let mut stop = false;

    let outcome = loop {
        if stop {
            break GenerationOutcome::Interrupted(InterruptReason::Cancelled);
        }

        tokio::select! {
            biased;

            () = &mut timeout => {
                warn!(message_id = %target.assistant_id, "generation: timed out");
                break GenerationOutcome::Interrupted(InterruptReason::TimedOut);
            }

            result = async {
                match in_flight.as_mut() {
                    Some(write) => write.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                match result {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(message_id = %target.assistant_id, "generation: reply no longer referenced, stopping");
                        stop = true;
                    }
                    Err(e) => {
                        warn!(error = %e, message_id = %target.assistant_id, "generation: partial write failed");
                        dirty = true;
                    }
                }
                if !stop && dirty {
                    in_flight = Some(persist_and_check(store.clone(), target.clone(), Some(assistant.clone())));
                    dirty = false;
                }
            }

            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    let finished = apply_chunk(assistant, chunk);
                    if finished {
                        break GenerationOutcome::Completed;
                    }
                    if in_flight.is_none() {
                        in_flight = Some(persist_and_check(store.clone(), target.clone(), Some(assistant.clone())));
                    } else {
                        dirty = true;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, backend = %backend_name, "generation: stream failed");
                    break GenerationOutcome::Interrupted(InterruptReason::StreamFailed);
                }
                None => {
                    warn!(backend = %backend_name, "generation: stream ended without finish reason");
                    break GenerationOutcome::Interrupted(InterruptReason::StreamEnded);
                }
            },

            _ = liveness.tick(), if in_flight.is_none() => {
                in_flight = Some(persist_and_check(store.clone(), target.clone(), None));
            }
        }
    };

    // EDGE: abort upstream before waiting on the last partial write.
    drop(stream);
    if let Some(write) = in_flight {
        if let Err(e) = write.await {
            warn!(error = %e, message_id = %target.assistant_id, "generation: partial write failed");
        }
    }
    outcome
}

/// Fold one chunk into the reply. Returns `true` on the finishing chunk.
fn apply_chunk(assistant: &mut Message, chunk: TokenChunk) -> bool {
    assistant.text.push_str(&chunk.text);
    assistant.timestamp = now_ms();
    if chunk.is_finish() {
        assistant.completed = true;
        return true;
    }
    false
}

/// Optionally persist `snapshot`, then report whether the head still
/// references the reply.
fn persist_and_check(store: Arc<dyn DocumentStore>, target: Target, snapshot: Option<Message>) -> PendingWrite {
    async move {
        if let Some(message) = snapshot {
            set_json(store.as_ref(), &target.message_key, &message).await?;
        }
        still_referenced(store.as_ref(), &target.head_key, &target.assistant_id).await
    }
    .boxed()
}

/// Whether the head at `head_key` exists and references `id`.
///
/// # Errors
///
/// Returns a store or decode error.
pub async fn still_referenced(store: &dyn DocumentStore, head_key: &Key, id: &MessageId) -> Result<bool, StoreError> {
    let head: Option<ConversationHead> = store.get(head_key).await?.decode()?;
    Ok(head.is_some_and(|h| h.references(id)))
}

#[cfg(test)]
#[path = "generation_test.rs"]
mod tests;
