//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the document store, the immutable backend registry, the generation
//! supervisor and the parsed configuration. Nothing in it is locked by
//! request handlers: conversations coordinate through store versionstamps.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::BackendRegistry;
use crate::services::supervisor::GenerationSupervisor;
use crate::store::DocumentStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub backends: Arc<BackendRegistry>,
    pub generations: GenerationSupervisor,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, backends: BackendRegistry, config: AppConfig) -> Self {
        let backends = Arc::new(backends);
        let generations = GenerationSupervisor::new(store.clone(), backends.clone(), config.generation);
        Self { store, backends, generations, config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
