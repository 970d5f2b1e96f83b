use axum::body::{Body, to_bytes};
use axum::http::{Method, Request};
use tower::ServiceExt;

use super::*;
use crate::config::AppConfig;
use crate::llm::BackendRegistry;
use crate::state::test_helpers;
use crate::store::memory::MemoryStore;

/// Send one request through a fresh router over `state`.
pub(super) async fn send(state: &AppState, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app(state.clone()).oneshot(request.body(body).unwrap()).await.unwrap()
}

pub(super) async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let state = test_helpers::test_app_state();
    assert_eq!(send(&state, Method::GET, "/healthz", None).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn root_without_default_workspace_is_not_found() {
    let state = test_helpers::test_app_state();
    assert_eq!(send(&state, Method::GET, "/", None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_redirects_to_default_workspace() {
    let config = AppConfig { default_workspace: Some("home".into()), ..AppConfig::default() };
    let state = AppState::new(std::sync::Arc::new(MemoryStore::new()), BackendRegistry::empty(), config);
    let response = send(&state, Method::GET, "/", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/api/workspace/home");
}

#[tokio::test]
async fn workspace_lifecycle() {
    let state = test_helpers::test_app_state();

    let created = send(&state, Method::POST, "/api/workspace", None).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    let ws = created["id"].as_str().unwrap().to_string();
    assert!(created["createdAt"].as_i64().is_some());

    let chat = send(&state, Method::POST, &format!("/api/workspace/{ws}/chat"), None).await;
    assert_eq!(chat.status(), StatusCode::CREATED);
    let chat = json_body(chat).await;
    assert_eq!(chat["title"], "New Chat");
    assert_eq!(chat["messages"], serde_json::json!([]));

    let info = json_body(send(&state, Method::GET, &format!("/api/workspace/{ws}"), None).await).await;
    let heads = info["heads"].as_array().unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0]["id"], chat["id"]);
    assert!(heads[0].get("messages").is_none());
}

#[tokio::test]
async fn missing_workspace_has_structured_error() {
    let state = test_helpers::test_app_state();
    let response = send(&state, Method::GET, "/api/workspace/nope", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], "E_WORKSPACE_NOT_FOUND");
    assert_eq!(body["retryable"], false);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let chat = send(&state, Method::POST, "/api/workspace/nope/chat", None).await;
    assert_eq!(chat.status(), StatusCode::NOT_FOUND);
}

#[test]
fn chat_errors_map_to_statuses() {
    use crate::model::ValidationError;
    assert_eq!(ApiError::from(ChatError::Conflict).status(), StatusCode::CONFLICT);
    assert_eq!(ApiError::from(ChatError::ChatNotFound("c".into())).status(), StatusCode::NOT_FOUND);
    assert_eq!(
        ApiError::from(ChatError::Validation(ValidationError::EmptyText)).status(),
        StatusCode::BAD_REQUEST
    );
}

#[test]
fn accept_header_selects_event_stream() {
    let mut headers = HeaderMap::new();
    assert!(!wants_event_stream(&headers));
    headers.insert(ACCEPT, "application/json".parse().unwrap());
    assert!(!wants_event_stream(&headers));
    headers.insert(ACCEPT, "text/html, text/event-stream;q=0.9".parse().unwrap());
    assert!(wants_event_stream(&headers));
}
