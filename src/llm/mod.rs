//! LLM: registry of OpenAI-compatible streaming backends.
//!
//! DESIGN
//! ======
//! The registry is built once at startup from [`BackendsConfig`] and is
//! immutable afterwards, so it is shared as a plain `Arc` with no locking.
//! Backends sit behind the [`ChatBackend`] trait so tests can register mocks.

pub mod config;
pub mod openai;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use config::BackendsConfig;
pub use types::{ChatBackend, ChatMessage, LlmError, TokenChunk};

#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ChatBackend>>,
    default_backend: Option<String>,
}

impl BackendRegistry {
    /// Registry with no backends. Every generation ends interrupted.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build clients for every configured backend.
    ///
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if any HTTP client cannot be constructed.
    pub fn from_config(config: &BackendsConfig) -> Result<Self, LlmError> {
        let mut registry = Self { backends: BTreeMap::new(), default_backend: config.default_backend.clone() };
        for spec in &config.backends {
            let client = openai::OpenAiClient::new(spec, config.timeouts)?;
            tracing::info!(backend = %spec.name, model = %client.model(), "registered backend");
            registry.backends.insert(spec.name.clone(), Arc::new(client));
        }
        if let Some(default) = &registry.default_backend {
            if !registry.backends.contains_key(default) {
                tracing::warn!(backend = %default, "default backend is not configured");
            }
        }
        Ok(registry)
    }

    /// Register (or replace) a backend under `name`.
    #[cfg(test)]
    #[must_use]
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn ChatBackend>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    /// Backend ids, the default one first and the rest by name.
    #[must_use]
    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        if let Some(default) = &self.default_backend {
            if let Some(idx) = names.iter().position(|n| n == default) {
                let name = names.remove(idx);
                names.insert(0, name);
            }
        }
        names
    }

    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(name).cloned()
    }

    #[cfg(test)]
    #[must_use]
    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend.as_deref()
    }

    /// The explicit backend if given, else the default; `None` when neither
    /// names a registered backend.
    #[must_use]
    pub fn resolve(&self, explicit: Option<&str>) -> Option<(String, Arc<dyn ChatBackend>)> {
        let name = explicit.or(self.default_backend.as_deref())?;
        self.get(name).map(|backend| (name.to_string(), backend))
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
