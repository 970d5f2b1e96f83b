use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::llm::types::ChatRole;
use crate::model::head::Slot;
use crate::services::mutate::mutate;
use crate::state::test_helpers::{ChannelBackend, FailingBackend, ScriptedBackend, Step};
use crate::store::memory::MemoryStore;
use crate::store::{AtomicWrite, CommitResult, Entry, WatchStream};

const WS: &str = "ws";

fn config() -> GenerationConfig {
    GenerationConfig { timeout: Duration::from_secs(5), liveness_interval: Duration::from_secs(5) }
}

fn registry(backend: Arc<dyn crate::llm::ChatBackend>) -> Arc<BackendRegistry> {
    Arc::new(BackendRegistry::empty().with_backend("alpha", backend).with_default("alpha"))
}

/// Store a head with one fresh turn and return the matching job.
async fn seed_job(store: &dyn DocumentStore, user_text: &str) -> GenerationJob {
    let mut head = ConversationHead::new();
    let turn = head.append_turn(false);
    set_json(store, &Key::message(WS, turn.user.as_str()), &Message::user(turn.user.clone(), user_text))
        .await
        .unwrap();
    let assistant = Message::assistant_placeholder(turn.assistant.clone());
    set_json(store, &Key::message(WS, turn.assistant.as_str()), &assistant).await.unwrap();
    set_json(store, &Key::head(WS, &head.id), &head).await.unwrap();
    GenerationJob { workspace_id: WS.into(), chat_id: head.id.clone(), head, assistant }
}

async fn stored(store: &dyn DocumentStore, id: &MessageId) -> Message {
    messages::load(store, WS, id.as_str()).await.unwrap().unwrap()
}

async fn wait_for_text(store: &dyn DocumentStore, id: &MessageId, text: &str) {
    for _ in 0..200 {
        if stored(store, id).await.text == text {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("message never reached {text:?}");
}

async fn remove_from_head(store: &dyn DocumentStore, job: &GenerationJob) {
    let id = job.assistant.id.clone();
    mutate(store, &Key::head(WS, &job.chat_id), move |h| {
        h.remove_messages(&[id].into_iter().collect());
    })
    .await
    .unwrap();
}

// =============================================================================
// context
// =============================================================================

#[tokio::test]
async fn context_is_system_prompt_plus_window_without_pending() {
    let store = MemoryStore::new();
    let mut head = ConversationHead::new();
    head.system_prompt = "Be brief.".into();

    let old = head.append_turn(false);
    let fresh = head.append_turn(true);
    for (id, text) in [(&old.user, "old q"), (&fresh.user, "new q")] {
        set_json(&store, &Key::message(WS, id.as_str()), &Message::user(id.clone(), text)).await.unwrap();
    }
    let mut old_reply = Message::assistant_placeholder(old.assistant.clone());
    old_reply.text = "old a".into();
    set_json(&store, &Key::message(WS, old.assistant.as_str()), &old_reply).await.unwrap();

    let context = build_context(&store, WS, &head, &fresh.assistant).await.unwrap();
    assert_eq!(context, vec![ChatMessage::system("Be brief."), ChatMessage::user("new q")]);
}

#[tokio::test]
async fn context_keeps_prior_turns_without_boundary() {
    let store = MemoryStore::new();
    let mut head = ConversationHead::new();
    let first = head.append_turn(false);
    let second = head.append_turn(false);
    set_json(&store, &Key::message(WS, first.user.as_str()), &Message::user(first.user.clone(), "q1")).await.unwrap();
    let mut reply = Message::assistant_placeholder(first.assistant.clone());
    reply.text = "a1".into();
    set_json(&store, &Key::message(WS, first.assistant.as_str()), &reply).await.unwrap();
    set_json(&store, &Key::message(WS, second.user.as_str()), &Message::user(second.user.clone(), "q2")).await.unwrap();

    let context = build_context(&store, WS, &head, &second.assistant).await.unwrap();
    let roles: Vec<_> = context.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
    );
}

// =============================================================================
// terminal states
// =============================================================================

#[tokio::test]
async fn normal_finish_completes_message() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();

    let outcome = run_generation(store.clone(), registry(ScriptedBackend::replying("Hi there friend")), config(), job).await;
    assert_eq!(outcome, GenerationOutcome::Completed);

    let reply = stored(store.as_ref(), &id).await;
    assert_eq!(reply.text, "Hi there friend");
    assert!(reply.completed);
    assert!(!reply.interrupted);
    assert_eq!(reply.backend.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn stream_error_keeps_partial_text() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();
    let backend = ScriptedBackend::new(vec![Step::Text("par"), Step::Text("tial"), Step::Fail, Step::Text("never")]);

    let outcome = run_generation(store.clone(), registry(backend), config(), job).await;
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::StreamFailed));

    let reply = stored(store.as_ref(), &id).await;
    assert_eq!(reply.text, "partial");
    assert!(reply.completed);
    assert!(reply.interrupted);
}

#[tokio::test]
async fn stream_ending_without_finish_is_interrupted() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();
    let backend = ScriptedBackend::new(vec![Step::Text("cut")]);

    let outcome = run_generation(store.clone(), registry(backend), config(), job).await;
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::StreamEnded));
    let reply = stored(store.as_ref(), &id).await;
    assert_eq!(reply.text, "cut");
    assert!(reply.interrupted);
}

#[tokio::test]
async fn chunks_after_finish_are_ignored() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();
    let backend = ScriptedBackend::new(vec![Step::Text("done"), Step::Finish, Step::Text(" extra")]);

    run_generation(store.clone(), registry(backend), config(), job).await;
    assert_eq!(stored(store.as_ref(), &id).await.text, "done");
}

#[tokio::test]
async fn missing_backend_finalizes_without_generating() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();

    let outcome = run_generation(store.clone(), Arc::new(BackendRegistry::empty()), config(), job).await;
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::BackendUnavailable));
    let reply = stored(store.as_ref(), &id).await;
    assert!(reply.completed && reply.interrupted);
    assert!(reply.backend.is_none());
}

#[tokio::test]
async fn head_backend_overrides_default() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let mut job = seed_job(store.as_ref(), "Hello").await;
    job.head.backend = Some("beta".into());
    let id = job.assistant.id.clone();
    let backends = BackendRegistry::empty()
        .with_backend("alpha", ScriptedBackend::replying("from alpha"))
        .with_backend("beta", ScriptedBackend::replying("from beta"))
        .with_default("alpha");

    run_generation(store.clone(), Arc::new(backends), config(), job).await;
    let reply = stored(store.as_ref(), &id).await;
    assert_eq!(reply.text, "from beta");
    assert_eq!(reply.backend.as_deref(), Some("beta"));
}

#[tokio::test]
async fn backend_rejection_is_interrupted() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let outcome = run_generation(store.clone(), registry(Arc::new(FailingBackend)), config(), job).await;
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::StartFailed));
}

// =============================================================================
// cancellation
// =============================================================================

#[tokio::test]
async fn removal_mid_stream_stops_within_one_write() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();
    let (backend, control) = ChannelBackend::new();

    let task = tokio::spawn(run_generation(store.clone(), registry(backend), config(), job.clone()));

    control.send_text("first ");
    wait_for_text(store.as_ref(), &id, "first ").await;
    remove_from_head(store.as_ref(), &job).await;
    control.send_text("second");

    let outcome = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::Cancelled));
    assert!(control.stream_dropped());

    let reply = stored(store.as_ref(), &id).await;
    assert!(reply.completed);
    assert!(reply.interrupted);
    assert!(reply.text.starts_with("first "));
}

#[tokio::test]
async fn deleted_conversation_stops_generation() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let (backend, control) = ChannelBackend::new();
    let task = tokio::spawn(run_generation(store.clone(), registry(backend), config(), job.clone()));

    control.send_text("a");
    wait_for_text(store.as_ref(), &job.assistant.id, "a").await;
    store.delete(&Key::head(WS, &job.chat_id)).await.unwrap();
    control.send_text("b");

    let outcome = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::Cancelled));
}

#[tokio::test]
async fn liveness_check_stops_a_quiet_stream() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let (backend, control) = ChannelBackend::new();
    let cfg = GenerationConfig { timeout: Duration::from_secs(5), liveness_interval: Duration::from_millis(20) };
    let task = tokio::spawn(run_generation(store.clone(), registry(backend), cfg, job.clone()));

    remove_from_head(store.as_ref(), &job).await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::Cancelled));
    assert!(control.stream_dropped());
}

#[tokio::test]
async fn timeout_interrupts_a_stalled_stream() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let id = job.assistant.id.clone();
    let (backend, control) = ChannelBackend::new();
    let cfg = GenerationConfig { timeout: Duration::from_millis(50), liveness_interval: Duration::from_secs(5) };
    let task = tokio::spawn(run_generation(store.clone(), registry(backend), cfg, job));

    control.send_text("slow");
    let outcome = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Interrupted(InterruptReason::TimedOut));
    let reply = stored(store.as_ref(), &id).await;
    assert_eq!(reply.text, "slow");
    assert!(reply.interrupted);
}

#[tokio::test]
async fn completed_reply_is_not_rewritten_by_later_edits() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let job = seed_job(store.as_ref(), "Hello").await;
    let key = Key::message(WS, job.assistant.id.as_str());
    let chat_key = Key::head(WS, &job.chat_id);

    run_generation(store.clone(), registry(ScriptedBackend::replying("fin")), config(), job).await;
    let before = store.get(&key).await.unwrap();

    mutate(store.as_ref(), &chat_key, |h| h.slots.push(Slot::Boundary)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.get(&key).await.unwrap(), before);
}

// =============================================================================
// throttling
// =============================================================================

/// Delays message writes and records how many overlap.
struct SlowStore {
    inner: MemoryStore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    message_writes: AtomicUsize,
}

#[async_trait::async_trait]
impl DocumentStore for SlowStore {
    async fn get(&self, key: &Key) -> Result<Entry, StoreError> {
        self.inner.get(key).await
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitResult, StoreError> {
        let is_message = write.touched_keys().iter().any(|k| k.parts().first().is_some_and(|p| p == "messages"));
        if !is_message {
            return self.inner.commit(write).await;
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.message_writes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = self.inner.commit(write).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, StoreError> {
        self.inner.list_prefix(prefix).await
    }

    async fn watch(&self, key: &Key) -> Result<WatchStream, StoreError> {
        self.inner.watch(key).await
    }
}

#[tokio::test]
async fn at_most_one_write_in_flight_and_chunks_coalesce() {
    let slow = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
        message_writes: AtomicUsize::new(0),
    });
    let job = seed_job(&slow.inner, "Hello").await;
    let id = job.assistant.id.clone();

    let (backend, control) = ChannelBackend::new();
    let task = tokio::spawn(run_generation(slow.clone(), registry(backend), config(), job));
    for i in 0..40 {
        control.send_text(&format!("{i},"));
    }
    control.finish();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Completed);
    assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);
    assert!(slow.message_writes.load(Ordering::SeqCst) < 40);

    let expected: String = (0..40).map(|i| format!("{i},")).collect();
    let reply = stored(&slow.inner, &id).await;
    assert_eq!(reply.text, expected);
    assert!(reply.completed);
}
