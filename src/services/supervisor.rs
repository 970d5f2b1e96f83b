//! Generation supervisor: owns every spawned reply task.
//!
//! DESIGN
//! ======
//! A turn request commits and returns immediately; the reply is produced by
//! a task whose lifetime belongs to the conversation, not to the request.
//! The supervisor spawns those tasks, keeps their handles keyed by head,
//! reaps finished ones (logging panics) and drains them on shutdown.
//!
//! The handle list sits behind a `std::sync::Mutex` that is never held
//! across an `await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::GenerationConfig;
use crate::llm::BackendRegistry;
use crate::model::MessageId;
use crate::services::generation::{self, GenerationJob, GenerationOutcome};
use crate::store::{DocumentStore, Key};

struct Tracked {
    head_key: Key,
    message_id: MessageId,
    handle: JoinHandle<GenerationOutcome>,
}

#[derive(Clone)]
pub struct GenerationSupervisor {
    store: Arc<dyn DocumentStore>,
    backends: Arc<BackendRegistry>,
    config: GenerationConfig,
    tasks: Arc<Mutex<Vec<Tracked>>>,
}

impl GenerationSupervisor {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, backends: Arc<BackendRegistry>, config: GenerationConfig) -> Self {
        Self { store, backends, config, tasks: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Spawn the reply task for `job`.
    pub fn spawn(&self, job: GenerationJob) {
        let head_key = Key::head(&job.workspace_id, &job.chat_id);
        let message_id = job.assistant.id.clone();
        let handle = tokio::spawn(generation::run_generation(
            self.store.clone(),
            self.backends.clone(),
            self.config,
            job,
        ));

        let mut tasks = self.lock();
        reap(&mut tasks);
        tasks.push(Tracked { head_key, message_id, handle });
    }

    /// Tasks still running, across all conversations.
    #[cfg(test)]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.lock();
        reap(&mut tasks);
        tasks.len()
    }

    /// Tasks still running for one conversation head.
    #[cfg(test)]
    #[must_use]
    pub fn in_flight_for(&self, head_key: &Key) -> usize {
        let mut tasks = self.lock();
        reap(&mut tasks);
        tasks.iter().filter(|t| &t.head_key == head_key).count()
    }

    /// Wait for every current task, returning their outcomes in spawn order.
    /// Panicked tasks are logged and omitted.
    #[cfg(test)]
    pub async fn join_all(&self) -> Vec<GenerationOutcome> {
        let tasks = std::mem::take(&mut *self.lock());
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, head = %task.head_key, message_id = %task.message_id, "generation: task failed"),
            }
        }
        outcomes
    }

    /// Give running tasks up to `grace` to finish, then abort the rest.
    /// Returns how many were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        if tasks.is_empty() {
            return 0;
        }
        info!(count = tasks.len(), grace_secs = grace.as_secs(), "generation: draining tasks");

        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, message_id = %task.message_id, "generation: task failed"),
                Err(_) => {
                    // EDGE: the aborted reply stays incomplete; observers see it go stale.
                    warn!(head = %task.head_key, message_id = %task.message_id, "generation: aborted at shutdown");
                    task.handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Tracked>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop finished handles, logging any that panicked.
fn reap(tasks: &mut Vec<Tracked>) {
    tasks.retain_mut(|task| {
        if !task.handle.is_finished() {
            return true;
        }
        if let Some(Err(e)) = (&mut task.handle).now_or_never() {
            error!(error = %e, head = %task.head_key, message_id = %task.message_id, "generation: task failed");
        }
        false
    });
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod tests;
