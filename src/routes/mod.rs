//! Router assembly and HTTP error translation.
//!
//! SYSTEM CONTEXT
//! ==============
//! Handlers stay thin: they extract path and body, call a service, and map
//! the service error into a status plus `{error, code, retryable}`. Update
//! feeds are served as server-sent events on the same paths as their JSON
//! reads, selected by `Accept: text/event-stream`.

pub mod chats;
pub mod workspaces;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{ACCEPT, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;
use crate::services::chat::ChatError;
use crate::services::workspace::WorkspaceError;
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/workspace", post(workspaces::create_workspace))
        .route("/api/workspace/{ws}", get(workspaces::get_workspace))
        .route("/api/workspace/{ws}/chat", post(workspaces::create_chat))
        .route(
            "/api/workspace/{ws}/chats/{chat}",
            get(chats::get_chat)
                .post(chats::post_turn)
                .patch(chats::patch_chat)
                .delete(chats::delete_chat),
        )
        .route("/api/workspace/{ws}/messages/{msg}", get(chats::get_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `GET /`: send visitors to the configured default workspace.
async fn root(State(state): State<AppState>) -> Response {
    match state.config.default_workspace.as_deref() {
        Some(ws) => (StatusCode::FOUND, [(LOCATION, format!("/api/workspace/{ws}"))]).into_response(),
        None => (StatusCode::NOT_FOUND, "no default workspace configured").into_response(),
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Whether the client asked for the live feed instead of a one-shot read.
pub(crate) fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|part| part.trim().starts_with("text/event-stream")))
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    retryable: bool,
}

/// A service error paired with the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
    retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { status, message: err.to_string(), code: err.error_code(), retryable: err.retryable() }
    }

    #[cfg(test)]
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
        }
        let body = ErrorBody { error: self.message, code: self.code, retryable: self.retryable };
        (self.status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::WorkspaceNotFound(_) | ChatError::ChatNotFound(_) | ChatError::MessageNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ChatError::Conflict => StatusCode::CONFLICT,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, &err)
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        let status = match &err {
            WorkspaceError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkspaceError::Collision(_) => StatusCode::CONFLICT,
            WorkspaceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, &err)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &err)
    }
}

/// Malformed request bodies.
#[derive(Debug, thiserror::Error)]
#[error("invalid request body: {0}")]
pub struct BadBody(String);

impl ErrorCode for BadBody {
    fn error_code(&self) -> &'static str {
        "E_BAD_REQUEST"
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, &BadBody(rejection.body_text()))
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
