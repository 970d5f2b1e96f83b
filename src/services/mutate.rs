//! Optimistic concurrency controller for conversation heads.
//!
//! DESIGN
//! ======
//! Every head mutation is read → pure edit → conditional commit against the
//! versionstamp that was read. There is exactly one attempt: a lost race is
//! reported as `Conflict` and the caller decides whether to re-read and retry.
//! No lock is taken on the head at any point.
//!
//! [`HeadDraft`] is the two-phase form of the same operation, for callers that
//! must commit the head together with other documents in one atomic batch.

use crate::model::{ConversationHead, now_ms};
use crate::store::{AtomicWrite, CommitResult, DocumentStore, Key, StoreError, Versionstamp};

#[derive(Debug, thiserror::Error)]
pub enum MutateError {
    #[error("conflicting update to {0}, please retry")]
    Conflict(Key),
    #[error("head not found: {0}")]
    NotFound(Key),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::error::ErrorCode for MutateError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "E_CONFLICT",
            Self::NotFound(_) => "E_HEAD_NOT_FOUND",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::NotFound(_) => false,
            Self::Store(e) => e.retryable(),
        }
    }
}

/// A detached head plus the versionstamp it was read at.
#[derive(Debug, Clone)]
pub struct HeadDraft {
    pub key: Key,
    pub head: ConversationHead,
    versionstamp: Versionstamp,
}

impl HeadDraft {
    /// # Errors
    ///
    /// `NotFound` when the head is absent; `Store` on read or decode failure.
    pub async fn read(store: &dyn DocumentStore, key: &Key) -> Result<Self, MutateError> {
        let entry = store.get(key).await?;
        let versioned = entry
            .decode_versioned::<ConversationHead>()?
            .ok_or_else(|| MutateError::NotFound(key.clone()))?;
        Ok(Self { key: key.clone(), head: versioned.value, versionstamp: versioned.versionstamp })
    }

    /// Commit the edited head, plus `extra` mutations, guarded by the read
    /// versionstamp. The head's last-modified time is stamped here.
    ///
    /// # Errors
    ///
    /// `Conflict` when the head changed since it was read; `Store` otherwise.
    pub async fn commit_with(
        mut self,
        store: &dyn DocumentStore,
        extra: AtomicWrite,
    ) -> Result<ConversationHead, MutateError> {
        self.head.timestamp = now_ms();
        let write = extra
            .check(self.key.clone(), Some(self.versionstamp))
            .set(self.key.clone(), &self.head)?;

        match store.commit(write).await? {
            CommitResult::Committed(_) => Ok(self.head),
            CommitResult::Conflict => {
                tracing::info!(key = %self.key, "head commit lost a race");
                Err(MutateError::Conflict(self.key))
            }
        }
    }

    /// # Errors
    ///
    /// See [`commit_with`](Self::commit_with).
    pub async fn commit(self, store: &dyn DocumentStore) -> Result<ConversationHead, MutateError> {
        self.commit_with(store, AtomicWrite::new()).await
    }
}

/// Single-attempt read-modify-write of the head at `key`.
///
/// # Errors
///
/// `NotFound` when the head is absent at read time, `Conflict` when another
/// commit landed in between, `Store` on storage failure.
pub async fn mutate<F>(store: &dyn DocumentStore, key: &Key, edit: F) -> Result<ConversationHead, MutateError>
where
    F: FnOnce(&mut ConversationHead),
{
    let mut draft = HeadDraft::read(store, key).await?;
    edit(&mut draft.head);
    draft.commit(store).await
}

#[cfg(test)]
#[path = "mutate_test.rs"]
mod tests;
