//! Conversation and message routes, including their live feeds.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{ConversationHead, HeadPatch};
use crate::routes::{ApiError, wants_event_stream};
use crate::services::chat::{self, TurnAccepted, TurnRequest};
use crate::services::feed;
use crate::state::AppState;
use crate::store::StoreError;

/// `GET /api/workspace/:ws/chats/:chat`: snapshot, or live feed on
/// `Accept: text/event-stream`.
pub async fn get_chat(
    State(state): State<AppState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if wants_event_stream(&headers) {
        let feed = feed::watch_chat(
            state.store.clone(),
            state.backends.list_available(),
            &workspace_id,
            &chat_id,
            state.config.feed.staleness,
        )
        .await?;
        info!(%workspace_id, %chat_id, "feed: chat subscriber connected");
        return Ok(event_stream(feed, format!("chat {workspace_id}/{chat_id}")).into_response());
    }

    Ok(Json(chat::load_chat(&state, &workspace_id, &chat_id).await?).into_response())
}

/// `POST /api/workspace/:ws/chats/:chat`: append a turn and start the reply.
pub async fn post_turn(
    State(state): State<AppState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnAccepted>, ApiError> {
    let Json(request) = body?;
    Ok(Json(chat::post_turn(&state, &workspace_id, &chat_id, request).await?))
}

/// `PATCH /api/workspace/:ws/chats/:chat`: edit title, prompt, backend, or
/// remove messages.
pub async fn patch_chat(
    State(state): State<AppState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
    body: Result<Json<HeadPatch>, JsonRejection>,
) -> Result<Json<ConversationHead>, ApiError> {
    let Json(patch) = body?;
    Ok(Json(chat::patch_chat(&state, &workspace_id, &chat_id, patch).await?))
}

/// `DELETE /api/workspace/:ws/chats/:chat`
pub async fn delete_chat(
    State(state): State<AppState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    chat::delete_chat(state.store.as_ref(), &workspace_id, &chat_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/workspace/:ws/messages/:msg`: one rendered message, or its live
/// feed on `Accept: text/event-stream`.
pub async fn get_message(
    State(state): State<AppState>,
    Path((workspace_id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if wants_event_stream(&headers) {
        let feed =
            feed::watch_message(state.store.as_ref(), &workspace_id, &message_id, state.config.feed.staleness).await?;
        return Ok(event_stream(feed, format!("message {workspace_id}/{message_id}")).into_response());
    }

    Ok(Json(chat::get_message(&state, &workspace_id, &message_id).await?).into_response())
}

// =============================================================================
// SSE
// =============================================================================

/// Encode each feed item as one `data:` event. A feed error is logged and
/// closes the response; the client reconnects for a fresh snapshot.
fn event_stream<T>(
    feed: BoxStream<'static, Result<T, StoreError>>,
    topic: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let events = feed.scan(topic, |topic, item| {
        let event = match item {
            Ok(payload) => match Event::default().json_data(&payload) {
                Ok(event) => Some(Ok::<_, Infallible>(event)),
                Err(e) => {
                    warn!(error = %e, topic = %topic, "feed: encode failed");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, topic = %topic, "feed: subscription ended");
                None
            }
        };
        futures::future::ready(event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
#[path = "chats_test.rs"]
mod tests;
