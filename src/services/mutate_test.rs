use super::*;
use crate::model::{Message, MessageId};
use crate::store::memory::MemoryStore;
use crate::store::set_json;

async fn seed_head(store: &MemoryStore) -> (Key, ConversationHead) {
    let head = ConversationHead::new();
    let key = Key::head("ws", &head.id);
    set_json(store, &key, &head).await.unwrap();
    (key, head)
}

#[tokio::test]
async fn mutate_applies_edit_and_persists() {
    let store = MemoryStore::new();
    let (key, _) = seed_head(&store).await;

    let updated = mutate(&store, &key, |head| head.title = "Renamed".into())
        .await
        .unwrap();
    assert_eq!(updated.title, "Renamed");

    let stored: ConversationHead = store.get(&key).await.unwrap().decode().unwrap().unwrap();
    assert_eq!(stored, updated);
}

#[tokio::test]
async fn mutate_missing_head_is_not_found() {
    let store = MemoryStore::new();
    let key = Key::head("ws", "missing");
    let result = mutate(&store, &key, |_| {}).await;
    assert!(matches!(result, Err(MutateError::NotFound(_))));
    assert!(store.get(&key).await.unwrap().value.is_none());
}

#[tokio::test]
async fn racing_drafts_exactly_one_wins() {
    let store = MemoryStore::new();
    let (key, _) = seed_head(&store).await;

    let mut first = HeadDraft::read(&store, &key).await.unwrap();
    let mut second = HeadDraft::read(&store, &key).await.unwrap();
    first.head.title = "first".into();
    second.head.title = "second".into();

    let winner = first.commit(&store).await.unwrap();
    let loser = second.commit(&store).await;
    assert!(matches!(loser, Err(MutateError::Conflict(_))));

    let stored: ConversationHead = store.get(&key).await.unwrap().decode().unwrap().unwrap();
    assert_eq!(stored.title, "first");
    assert_eq!(stored, winner);
}

#[tokio::test]
async fn concurrent_mutates_produce_one_success_per_version() {
    let store = MemoryStore::new();
    let (key, _) = seed_head(&store).await;

    let tasks = (0..8)
        .map(|i| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { mutate(&store, &key, move |h| h.title = format!("t{i}")).await })
        })
        .collect::<Vec<_>>();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(MutateError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(wins >= 1);
}

#[tokio::test]
async fn commit_with_writes_extra_documents_atomically() {
    let store = MemoryStore::new();
    let (key, _) = seed_head(&store).await;

    let mut draft = HeadDraft::read(&store, &key).await.unwrap();
    let turn = draft.head.append_turn(false);
    let msg_key = Key::message("ws", turn.user.as_str());
    let extra = AtomicWrite::new()
        .set(msg_key.clone(), &Message::user(turn.user.clone(), "hi"))
        .unwrap();

    // Concurrent edit invalidates the draft; nothing from the batch lands.
    mutate(&store, &key, |h| h.title = "other".into()).await.unwrap();
    let result = draft.commit_with(&store, extra).await;
    assert!(matches!(result, Err(MutateError::Conflict(_))));
    assert!(store.get(&msg_key).await.unwrap().value.is_none());
}

#[tokio::test]
async fn commit_stamps_last_modified_time() {
    let store = MemoryStore::new();
    let (key, original) = seed_head(&store).await;
    let updated = mutate(&store, &key, |h| h.slots.clear()).await.unwrap();
    assert!(updated.timestamp >= original.timestamp);
    assert!(!HeadDraft::read(&store, &key).await.unwrap().head.references(&MessageId::generate()));
}

#[test]
fn conflict_is_retryable() {
    use crate::error::ErrorCode;
    let err = MutateError::Conflict(Key::head("w", "c"));
    assert_eq!(err.error_code(), "E_CONFLICT");
    assert!(err.retryable());
    assert!(!MutateError::NotFound(Key::head("w", "c")).retryable());
}
