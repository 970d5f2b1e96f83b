//! Message document reads shared by generation, the feed and the routes.

use crate::model::{Message, MessageId};
use crate::store::{DocumentStore, Key, StoreError};

/// Keys per `get_many` round trip.
pub const MESSAGE_BATCH_SIZE: usize = 10;

/// Load messages in `ids` order, `MESSAGE_BATCH_SIZE` keys at a time.
///
/// Ids without a stored document are skipped.
///
/// # Errors
///
/// Returns a store or decode error for the first failing batch.
pub async fn batch_load(
    store: &dyn DocumentStore,
    workspace_id: &str,
    ids: &[MessageId],
) -> Result<Vec<Message>, StoreError> {
    let mut out = Vec::with_capacity(ids.len());
    for batch in ids.chunks(MESSAGE_BATCH_SIZE) {
        let keys: Vec<Key> = batch
            .iter()
            .map(|id| Key::message(workspace_id, id.as_str()))
            .collect();
        for entry in store.get_many(&keys).await? {
            match entry.decode::<Message>()? {
                Some(message) => out.push(message),
                None => tracing::warn!(key = %entry.key, "referenced message is missing"),
            }
        }
    }
    Ok(out)
}

/// Point read of one message.
///
/// # Errors
///
/// Returns a store or decode error.
pub async fn load(store: &dyn DocumentStore, workspace_id: &str, id: &str) -> Result<Option<Message>, StoreError> {
    store.get(&Key::message(workspace_id, id)).await?.decode()
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
