//! Document store adapter: versioned key-value documents with watches.
//!
//! DESIGN
//! ======
//! Every document lives under a hierarchical [`Key`] and carries a
//! [`Versionstamp`] that changes on every commit. Writers coordinate only
//! through [`AtomicWrite`] checks: a batch commits iff every checked key still
//! has the versionstamp the caller read (or is still absent). Nothing is ever
//! locked across an `await` by callers.
//!
//! WATCH CONTRACT
//! ==============
//! `watch(key)` yields the current entry immediately, then one entry per
//! successful commit that touches the key. Deliveries are not deduplicated by
//! content. Dropping the returned stream releases the underlying watch
//! resource on every implementation.

pub mod memory;
pub mod postgres;

use std::fmt;

use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// =============================================================================
// KEYS
// =============================================================================

/// Hierarchical document key, ordered part by part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<String>);

impl Key {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// `["workspaces", ws]`
    #[must_use]
    pub fn workspace(workspace_id: &str) -> Self {
        Self::new(["workspaces", workspace_id])
    }

    /// Prefix covering every conversation head of a workspace.
    #[must_use]
    pub fn heads(workspace_id: &str) -> Self {
        Self::new(["heads", workspace_id])
    }

    /// `["heads", ws, chat]`
    #[must_use]
    pub fn head(workspace_id: &str, chat_id: &str) -> Self {
        Self::new(["heads", workspace_id, chat_id])
    }

    /// `["messages", ws, message]`
    #[must_use]
    pub fn message(workspace_id: &str, message_id: &str) -> Self {
        Self::new(["messages", workspace_id, message_id])
    }

    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Opaque commit token. Strictly increasing across commits of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Versionstamp(pub u64);

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// =============================================================================
// ENTRIES
// =============================================================================

/// A point read. `value` and `versionstamp` are `None` when the key is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<serde_json::Value>,
    pub versionstamp: Option<Versionstamp>,
}

impl Entry {
    #[must_use]
    pub fn absent(key: Key) -> Self {
        Self { key, value: None, versionstamp: None }
    }

    /// Deserialize the stored document, if any.
    ///
    /// # Errors
    ///
    /// Returns `Serde` if the stored JSON does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        self.value
            .as_ref()
            .map(|v| T::deserialize(v).map_err(StoreError::from))
            .transpose()
    }

    /// Deserialize together with the versionstamp the value was read at.
    ///
    /// # Errors
    ///
    /// Returns `Serde` if the stored JSON does not match `T`.
    pub fn decode_versioned<T: DeserializeOwned>(&self) -> Result<Option<Versioned<T>>, StoreError> {
        let (Some(value), Some(versionstamp)) = (&self.value, self.versionstamp) else {
            return Ok(None);
        };
        Ok(Some(Versioned { value: T::deserialize(value)?, versionstamp }))
    }
}

/// A typed document plus the token it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub versionstamp: Versionstamp,
}

// =============================================================================
// ATOMIC WRITES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(Key, serde_json::Value),
    Delete(Key),
}

impl Mutation {
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Set(key, _) | Self::Delete(key) => key,
        }
    }
}

/// A batch of checks and mutations applied all-or-nothing.
///
/// A check with `None` requires the key to be absent at commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicWrite {
    pub checks: Vec<(Key, Option<Versionstamp>)>,
    pub mutations: Vec<Mutation>,
}

impl AtomicWrite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn check(mut self, key: Key, versionstamp: Option<Versionstamp>) -> Self {
        self.checks.push((key, versionstamp));
        self
    }

    /// Queue a set of a serializable document.
    ///
    /// # Errors
    ///
    /// Returns `Serde` if `value` cannot be represented as JSON.
    pub fn set<T: Serialize>(mut self, key: Key, value: &T) -> Result<Self, StoreError> {
        self.mutations.push(Mutation::Set(key, serde_json::to_value(value)?));
        Ok(self)
    }

    #[cfg(test)]
    #[must_use]
    pub fn delete(mut self, key: Key) -> Self {
        self.mutations.push(Mutation::Delete(key));
        self
    }

    /// Distinct keys touched by mutations, in first-touch order.
    #[must_use]
    pub fn touched_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = Vec::new();
        for mutation in &self.mutations {
            if !keys.contains(mutation.key()) {
                keys.push(mutation.key().clone());
            }
        }
        keys
    }
}

/// Outcome of an atomic commit. A failed check is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed(Versionstamp),
    Conflict,
}

impl CommitResult {
    #[must_use]
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("watch closed for key {0}")]
    WatchClosed(Key),
    #[error("unconditional write to {0} reported a conflict")]
    UnexpectedConflict(Key),
}

impl crate::error::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Serde(_) => "E_SERDE",
            Self::Database(_) => "E_DATABASE",
            Self::WatchClosed(_) => "E_WATCH_CLOSED",
            Self::UnexpectedConflict(_) => "E_UNEXPECTED_CONFLICT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::WatchClosed(_))
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Stream of watch deliveries. Dropping it releases the watch.
pub type WatchStream = BoxStream<'static, Result<Entry, StoreError>>;

/// Key-value document store with atomic conditional commits and watches.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read.
    async fn get(&self, key: &Key) -> Result<Entry, StoreError>;

    /// Apply a batch of checks and mutations atomically.
    async fn commit(&self, write: AtomicWrite) -> Result<CommitResult, StoreError>;

    /// Every present entry whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, StoreError>;

    /// Subscribe to a key. First delivery is the current entry.
    async fn watch(&self, key: &Key) -> Result<WatchStream, StoreError>;

    /// Read many keys, preserving input order.
    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, StoreError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    /// Unconditional set.
    async fn set(&self, key: &Key, value: serde_json::Value) -> Result<Versionstamp, StoreError> {
        let write = AtomicWrite { checks: Vec::new(), mutations: vec![Mutation::Set(key.clone(), value)] };
        match self.commit(write).await? {
            CommitResult::Committed(versionstamp) => Ok(versionstamp),
            // EDGE: an unchecked batch cannot lose a race.
            CommitResult::Conflict => Err(StoreError::UnexpectedConflict(key.clone())),
        }
    }

    /// Set only if the key is still at `expected` (`None` = still absent).
    async fn conditional_set(
        &self,
        key: &Key,
        value: serde_json::Value,
        expected: Option<Versionstamp>,
    ) -> Result<CommitResult, StoreError> {
        let write = AtomicWrite {
            checks: vec![(key.clone(), expected)],
            mutations: vec![Mutation::Set(key.clone(), value)],
        };
        self.commit(write).await
    }

    /// Unconditional delete.
    async fn delete(&self, key: &Key) -> Result<(), StoreError> {
        let write = AtomicWrite { checks: Vec::new(), mutations: vec![Mutation::Delete(key.clone())] };
        self.commit(write).await?;
        Ok(())
    }
}

/// Serialize and set a typed document.
///
/// # Errors
///
/// Returns a store or serialization error.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    key: &Key,
    value: &T,
) -> Result<Versionstamp, StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
