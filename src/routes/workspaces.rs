//! Workspace routes: create, inspect, and add conversations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use crate::model::{ConversationHead, WorkspaceInfo};
use crate::routes::ApiError;
use crate::services::{chat, workspace};
use crate::state::AppState;

/// `POST /api/workspace`: create an empty workspace.
pub async fn create_workspace(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<workspace::WorkspaceCreated>), ApiError> {
    let created = workspace::create_workspace(state.store.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/workspace/:ws`: workspace record with its conversation summaries.
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<Json<WorkspaceInfo>, ApiError> {
    Ok(Json(workspace::load_workspace(state.store.as_ref(), &workspace_id).await?))
}

/// `POST /api/workspace/:ws/chat`: start a conversation with default settings.
pub async fn create_chat(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<(StatusCode, Json<ConversationHead>), ApiError> {
    let head = chat::create_chat(state.store.as_ref(), &workspace_id).await?;
    Ok((StatusCode::CREATED, Json(head)))
}
