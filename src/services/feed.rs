//! Update feed: store watches bridged into rendered snapshots.
//!
//! DESIGN
//! ======
//! Each subscription owns its own store watch and its own "already rendered"
//! set, seeded empty. A head delivery loads and renders every referenced
//! message the subscription has not sent yet, then emits
//! `{head, messages, availableBackends}`. A message delivery renders that one
//! message. Streaming replies therefore reach a conversation subscriber once
//! (when first referenced) and reach message subscribers on every partial
//! write.
//!
//! Delivery is at-least-once: every commit to the watched key yields a
//! snapshot even if nothing visible changed, and a reconnecting observer
//! starts over with a fresh seen set.
//!
//! ERROR HANDLING
//! ==============
//! A store error is yielded as the stream's last item; the subscription ends
//! and the watch is released. Dropping the stream releases it too.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Serialize;

use crate::model::{ConversationHead, Message, MessageId, MessageState, now_ms};
use crate::render;
use crate::services::messages;
use crate::store::{DocumentStore, Key, StoreError, WatchStream};

// =============================================================================
// TYPES
// =============================================================================

/// A message as observers see it: stored fields plus rendered HTML and the
/// derived display state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub html: String,
    pub state: MessageState,
}

impl RenderedMessage {
    #[must_use]
    pub fn new(message: Message, staleness: Duration) -> Self {
        let html = render::render(&message.text);
        let state = message.display_state(now_ms(), staleness);
        Self { message, html, state }
    }
}

/// One conversation feed delivery. `head` is `None` once the conversation is
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub head: Option<ConversationHead>,
    pub messages: Vec<RenderedMessage>,
    pub available_backends: Vec<String>,
}

pub type ChatFeed = BoxStream<'static, Result<ChatSnapshot, StoreError>>;
pub type MessageFeed = BoxStream<'static, Result<Option<RenderedMessage>, StoreError>>;

// =============================================================================
// CONVERSATION FEED
// =============================================================================

struct ChatFeedState {
    watch: WatchStream,
    store: Arc<dyn DocumentStore>,
    workspace_id: String,
    available_backends: Vec<String>,
    staleness: Duration,
    seen: HashSet<MessageId>,
    done: bool,
}

/// Subscribe to a conversation head.
///
/// # Errors
///
/// Returns a store error if the watch cannot be established.
pub async fn watch_chat(
    store: Arc<dyn DocumentStore>,
    available_backends: Vec<String>,
    workspace_id: &str,
    chat_id: &str,
    staleness: Duration,
) -> Result<ChatFeed, StoreError> {
    let watch = store.watch(&Key::head(workspace_id, chat_id)).await?;
    let state = ChatFeedState {
        watch,
        store,
        workspace_id: workspace_id.to_string(),
        available_backends,
        staleness,
        seen: HashSet::new(),
        done: false,
    };

    Ok(stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        let item = match st.watch.next().await? {
            Ok(entry) => match entry.decode::<ConversationHead>() {
                Ok(head) => snapshot(&mut st, head).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if item.is_err() {
            st.done = true;
        }
        Some((item, st))
    })
    .boxed())
}

async fn snapshot(st: &mut ChatFeedState, head: Option<ConversationHead>) -> Result<ChatSnapshot, StoreError> {
    let unseen: Vec<MessageId> = head
        .as_ref()
        .map(|h| h.message_ids().filter(|id| !st.seen.contains(*id)).cloned().collect())
        .unwrap_or_default();

    let loaded = messages::batch_load(st.store.as_ref(), &st.workspace_id, &unseen).await?;
    let mut rendered = Vec::with_capacity(loaded.len());
    for message in loaded {
        st.seen.insert(message.id.clone());
        rendered.push(RenderedMessage::new(message, st.staleness));
    }

    Ok(ChatSnapshot { head, messages: rendered, available_backends: st.available_backends.clone() })
}

// =============================================================================
// MESSAGE FEED
// =============================================================================

/// Subscribe to one message. Yields `None` while the message is absent.
///
/// # Errors
///
/// Returns a store error if the watch cannot be established.
pub async fn watch_message(
    store: &dyn DocumentStore,
    workspace_id: &str,
    message_id: &str,
    staleness: Duration,
) -> Result<MessageFeed, StoreError> {
    let watch = store.watch(&Key::message(workspace_id, message_id)).await?;

    Ok(stream::unfold((watch, false), move |(mut watch, done)| async move {
        if done {
            return None;
        }
        let item = watch
            .next()
            .await?
            .and_then(|entry| entry.decode::<Message>())
            .map(|message| message.map(|m| RenderedMessage::new(m, staleness)));
        let done = item.is_err();
        Some((item, (watch, done)))
    })
    .boxed())
}

#[cfg(test)]
#[path = "feed_test.rs"]
mod tests;
