//! PostgreSQL-backed document store.
//!
//! DESIGN
//! ======
//! Documents live in `kv_entries(key TEXT[], value JSONB, versionstamp BIGINT)`.
//! Versionstamps come from a single sequence so they increase across keys.
//!
//! A commit runs in one transaction:
//! 1. take a transaction-scoped advisory lock per touched/checked key, in
//!    key order;
//! 2. compare every check against the locked row;
//! 3. apply the mutations under one fresh versionstamp;
//! 4. `pg_notify('kv_commit', <key json>)` per written key.
//!
//! Notifications are delivered only when the transaction commits, so watchers
//! never see rolled-back writes.
//!
//! WATCHES
//! =======
//! Every watch owns a `PgListener` connection taken from a dedicated listener
//! pool. It LISTENs first, then reads the current entry, so no commit can fall
//! between the initial delivery and the first notification. On each
//! notification for its key it re-reads the row.
//! Dropping the stream drops the listener and returns its connection.

use futures::stream;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::warn;

use super::{AtomicWrite, CommitResult, DocumentStore, Entry, Key, Mutation, StoreError, Versionstamp, WatchStream};

const NOTIFY_CHANNEL: &str = "kv_commit";

type Row = (Vec<String>, serde_json::Value, i64);

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    listeners: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool, listeners: PgPool) -> Self {
        Self { pool, listeners }
    }
}

fn versionstamp_from_db(raw: i64) -> Versionstamp {
    Versionstamp(u64::try_from(raw).unwrap_or_default())
}

fn versionstamp_to_db(vs: Versionstamp) -> i64 {
    i64::try_from(vs.0).unwrap_or(i64::MAX)
}

fn row_to_entry((key, value, versionstamp): Row) -> Entry {
    Entry { key: Key::new(key), value: Some(value), versionstamp: Some(versionstamp_from_db(versionstamp)) }
}

async fn fetch_entry<'e, E>(executor: E, key: &Key) -> Result<Entry, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, Row>("SELECT key, value, versionstamp FROM kv_entries WHERE key = $1")
        .bind(key.parts())
        .fetch_optional(executor)
        .await?;
    Ok(row.map_or_else(|| Entry::absent(key.clone()), row_to_entry))
}

#[async_trait::async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, key: &Key) -> Result<Entry, StoreError> {
        fetch_entry(&self.pool, key).await
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitResult, StoreError> {
        let mut lock_keys: Vec<&Key> = write
            .checks
            .iter()
            .map(|(key, _)| key)
            .chain(write.mutations.iter().map(Mutation::key))
            .collect();
        lock_keys.sort();
        lock_keys.dedup();

        let mut tx = self.pool.begin().await?;

        // PHASE: LOCK
        for key in &lock_keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended(array_to_string($1::text[], '/'), 0))")
                .bind(key.parts())
                .execute(tx.as_mut())
                .await?;
        }

        // PHASE: CHECK
        for (key, expected) in &write.checks {
            let current = fetch_entry(tx.as_mut(), key).await?;
            if current.versionstamp != *expected {
                tx.rollback().await?;
                return Ok(CommitResult::Conflict);
            }
        }

        // PHASE: APPLY
        let raw: i64 = sqlx::query_scalar("SELECT nextval('kv_versionstamp_seq')")
            .fetch_one(tx.as_mut())
            .await?;
        let versionstamp = versionstamp_from_db(raw);
        let touched = write.touched_keys();
        for mutation in write.mutations {
            match mutation {
                Mutation::Set(key, value) => {
                    sqlx::query(
                        "INSERT INTO kv_entries (key, value, versionstamp) VALUES ($1, $2, $3)
                         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, versionstamp = EXCLUDED.versionstamp",
                    )
                    .bind(key.parts())
                    .bind(&value)
                    .bind(versionstamp_to_db(versionstamp))
                    .execute(tx.as_mut())
                    .await?;
                }
                Mutation::Delete(key) => {
                    sqlx::query("DELETE FROM kv_entries WHERE key = $1")
                        .bind(key.parts())
                        .execute(tx.as_mut())
                        .await?;
                }
            }
        }

        // PHASE: NOTIFY (delivered at COMMIT)
        for key in &touched {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(NOTIFY_CHANNEL)
                .bind(serde_json::to_string(key)?)
                .execute(tx.as_mut())
                .await?;
        }

        tx.commit().await?;
        Ok(CommitResult::Committed(versionstamp))
    }

    async fn list_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, StoreError> {
        let depth = i32::try_from(prefix.parts().len()).unwrap_or(i32::MAX);
        let rows = sqlx::query_as::<_, Row>(
            "SELECT key, value, versionstamp FROM kv_entries
             WHERE $2 = 0 OR key[1:$2] = $1
             ORDER BY key",
        )
        .bind(prefix.parts())
        .bind(depth)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    async fn watch(&self, key: &Key) -> Result<WatchStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.listeners).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        let initial = fetch_entry(&self.pool, key).await?;

        let state =
            WatchState { listener, pool: self.pool.clone(), key: key.clone(), initial: Some(initial), closed: false };
        Ok(Box::pin(stream::unfold(state, next_delivery)))
    }
}

// =============================================================================
// WATCH LOOP
// =============================================================================

struct WatchState {
    listener: PgListener,
    pool: PgPool,
    key: Key,
    initial: Option<Entry>,
    closed: bool,
}

async fn next_delivery(mut state: WatchState) -> Option<(Result<Entry, StoreError>, WatchState)> {
    if state.closed {
        return None;
    }
    if let Some(entry) = state.initial.take() {
        return Some((Ok(entry), state));
    }

    loop {
        let notification = match state.listener.try_recv().await {
            Ok(Some(n)) => n,
            // Connection lost: notifications may have been missed, so end the
            // watch and let the subscriber resubscribe for a fresh snapshot.
            Ok(None) => {
                warn!(key = %state.key, "kv watch: listener connection lost");
                state.closed = true;
                return Some((Err(StoreError::WatchClosed(state.key.clone())), state));
            }
            Err(e) => {
                state.closed = true;
                return Some((Err(StoreError::Database(e)), state));
            }
        };

        let Ok(notified) = serde_json::from_str::<Key>(notification.payload()) else {
            warn!(payload = notification.payload(), "kv watch: ignoring malformed notification");
            continue;
        };
        if notified != state.key {
            continue;
        }

        let entry = fetch_entry(&state.pool, &state.key).await;
        return Some((entry, state));
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
