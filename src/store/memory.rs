//! In-process document store.
//!
//! DESIGN
//! ======
//! A single `std::sync::Mutex` guards the entry map, the versionstamp counter
//! and the watcher registry. The lock is never held across an `await`, so
//! commits are linearizable and watch deliveries are enqueued in commit order.
//!
//! Each watcher owns an unbounded channel. Deliveries are pushed while the
//! commit still holds the lock, so two subscribers always observe commits in
//! the same order. A [`MemoryWatch`] removes its registration on drop.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::{AtomicWrite, CommitResult, DocumentStore, Entry, Key, Mutation, StoreError, Versionstamp, WatchStream};

#[derive(Debug, Clone)]
struct Stored {
    value: serde_json::Value,
    versionstamp: Versionstamp,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<Key, Stored>,
    last_versionstamp: u64,
    watchers: HashMap<Key, Vec<Watcher>>,
    next_watcher_id: u64,
}

struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<Entry>,
}

impl Inner {
    fn entry(&self, key: &Key) -> Entry {
        match self.entries.get(key) {
            Some(stored) => Entry {
                key: key.clone(),
                value: Some(stored.value.clone()),
                versionstamp: Some(stored.versionstamp),
            },
            None => Entry::absent(key.clone()),
        }
    }

    fn notify(&mut self, key: &Key) {
        let entry = self.entry(key);
        if let Some(watchers) = self.watchers.get_mut(key) {
            // EDGE: a receiver dropped without running Drop (leaked) is pruned here.
            watchers.retain(|w| w.tx.send(entry.clone()).is_ok());
            if watchers.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live watch registrations on `key`.
    #[cfg(test)]
    #[must_use]
    pub fn watcher_count(&self, key: &Key) -> usize {
        self.lock().watchers.get(key).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Entry, StoreError> {
        Ok(self.lock().entry(key))
    }

    async fn get_many(&self, keys: &[Key]) -> Result<Vec<Entry>, StoreError> {
        let inner = self.lock();
        Ok(keys.iter().map(|key| inner.entry(key)).collect())
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitResult, StoreError> {
        let mut inner = self.lock();

        let stale = write
            .checks
            .iter()
            .any(|(key, expected)| inner.entries.get(key).map(|s| s.versionstamp) != *expected);
        if stale {
            return Ok(CommitResult::Conflict);
        }

        inner.last_versionstamp += 1;
        let versionstamp = Versionstamp(inner.last_versionstamp);
        let touched = write.touched_keys();
        for mutation in write.mutations {
            match mutation {
                Mutation::Set(key, value) => {
                    inner.entries.insert(key, Stored { value, versionstamp });
                }
                Mutation::Delete(key) => {
                    inner.entries.remove(&key);
                }
            }
        }
        for key in &touched {
            inner.notify(key);
        }

        Ok(CommitResult::Committed(versionstamp))
    }

    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| Entry {
                key: key.clone(),
                value: Some(stored.value.clone()),
                versionstamp: Some(stored.versionstamp),
            })
            .collect())
    }

    async fn watch(&self, key: &Key) -> Result<WatchStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            let current = inner.entry(key);
            // Receiver is alive on this line; send cannot fail.
            let _ = tx.send(current);
            inner.next_watcher_id += 1;
            let id = inner.next_watcher_id;
            inner
                .watchers
                .entry(key.clone())
                .or_default()
                .push(Watcher { id, tx });
            id
        };

        Ok(Box::pin(MemoryWatch { rx, key: key.clone(), id, store: self.clone() }))
    }
}

// =============================================================================
// WATCH HANDLE
// =============================================================================

/// Watch stream over one key. Deregisters itself when dropped.
pub struct MemoryWatch {
    rx: mpsc::UnboundedReceiver<Entry>,
    key: Key,
    id: u64,
    store: MemoryStore,
}

impl Stream for MemoryWatch {
    type Item = Result<Entry, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|entry| entry.map(Ok))
    }
}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        let mut inner = self.store.lock();
        if let Some(watchers) = inner.watchers.get_mut(&self.key) {
            watchers.retain(|w| w.id != self.id);
            if watchers.is_empty() {
                inner.watchers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
