//! Workspace service: create and list workspaces.
//!
//! A workspace is a bare record at `["workspaces", ws]`; its conversations
//! are found by prefix listing `["heads", ws]`, which returns them in id
//! (creation) order.

use serde::{Deserialize, Serialize};

use crate::model::{HeadSummary, WorkspaceInfo, WorkspaceRecord, new_id, now_ms};
use crate::store::{DocumentStore, Key, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace not found: {0}")]
    NotFound(String),
    #[error("workspace id collision: {0}")]
    Collision(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::error::ErrorCode for WorkspaceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_WORKSPACE_NOT_FOUND",
            Self::Collision(_) => "E_WORKSPACE_COLLISION",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::NotFound(_) => false,
            Self::Collision(_) => true,
            Self::Store(e) => e.retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCreated {
    pub id: String,
    pub created_at: i64,
}

/// Create an empty workspace under a fresh id.
///
/// # Errors
///
/// `Collision` if the id already exists; `Store` on storage failure.
pub async fn create_workspace(store: &dyn DocumentStore) -> Result<WorkspaceCreated, WorkspaceError> {
    let id = new_id();
    let record = WorkspaceRecord { created_at: now_ms() };
    let key = Key::workspace(&id);
    let value = serde_json::to_value(&record).map_err(StoreError::from)?;
    if !store.conditional_set(&key, value, None).await?.is_committed() {
        return Err(WorkspaceError::Collision(id));
    }
    tracing::info!(workspace_id = %id, "workspace created");
    Ok(WorkspaceCreated { id, created_at: record.created_at })
}

/// Whether `["workspaces", id]` exists.
///
/// # Errors
///
/// Returns a store error.
pub async fn workspace_exists(store: &dyn DocumentStore, id: &str) -> Result<bool, StoreError> {
    Ok(store.get(&Key::workspace(id)).await?.value.is_some())
}

/// Workspace listing: every head summary plus the creation time.
///
/// # Errors
///
/// `NotFound` when the workspace record is absent; `Store` on storage failure.
pub async fn load_workspace(store: &dyn DocumentStore, id: &str) -> Result<WorkspaceInfo, WorkspaceError> {
    let record: WorkspaceRecord = store
        .get(&Key::workspace(id))
        .await?
        .decode()?
        .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;

    let mut heads = Vec::new();
    for entry in store.list_prefix(&Key::heads(id)).await? {
        match entry.decode::<HeadSummary>() {
            Ok(Some(summary)) => heads.push(summary),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, key = %entry.key, "skipping undecodable head"),
        }
    }
    Ok(WorkspaceInfo { heads, created_at: record.created_at })
}

#[cfg(test)]
#[path = "workspace_test.rs"]
mod tests;
