//! Backend configuration parsed from environment variables.
//!
//! Each backend is one variable `CHATSPACE_BACKEND_<NAME>=<baseUrl>,<apiKey>,<model>`.
//! The backend id is `<NAME>` lowercased. Entries missing any of the three
//! fields are skipped with a warning instead of failing startup.

use crate::config::env_parse;

pub const BACKEND_VAR_PREFIX: &str = "CHATSPACE_BACKEND_";
pub const DEFAULT_BACKEND_VAR: &str = "CHATSPACE_DEFAULT_BACKEND";
pub const DEFAULT_LLM_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for LlmTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_LLM_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_LLM_CONNECT_TIMEOUT_SECS }
    }
}

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendsConfig {
    /// Sorted by name.
    pub backends: Vec<BackendSpec>,
    pub default_backend: Option<String>,
    pub timeouts: LlmTimeouts,
}

impl BackendsConfig {
    /// Build typed backend config from the process environment.
    ///
    /// - `CHATSPACE_BACKEND_<NAME>`: one per backend
    /// - `CHATSPACE_DEFAULT_BACKEND`: id used when a head names none
    /// - `LLM_REQUEST_TIMEOUT_SECS`: default 120
    /// - `LLM_CONNECT_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::from_vars(std::env::vars());
        config.timeouts = LlmTimeouts {
            request_secs: env_parse("LLM_REQUEST_TIMEOUT_SECS", DEFAULT_LLM_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("LLM_CONNECT_TIMEOUT_SECS", DEFAULT_LLM_CONNECT_TIMEOUT_SECS),
        };
        config
    }

    /// Parse backend entries out of arbitrary `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut backends = Vec::new();
        let mut default_backend = None;

        for (var, value) in vars {
            if var == DEFAULT_BACKEND_VAR {
                let name = value.trim().to_lowercase();
                default_backend = (!name.is_empty()).then_some(name);
                continue;
            }
            let Some(suffix) = var.strip_prefix(BACKEND_VAR_PREFIX) else {
                continue;
            };
            let name = suffix.to_lowercase();
            match parse_backend_value(&name, &value) {
                Some(spec) => backends.push(spec),
                None => tracing::warn!(backend = %name, "invalid backend entry, expected <baseUrl>,<apiKey>,<model>"),
            }
        }

        backends.sort_by(|a, b| a.name.cmp(&b.name));
        backends.dedup_by(|a, b| a.name == b.name);
        Self { backends, default_backend, timeouts: LlmTimeouts::default() }
    }
}

fn parse_backend_value(name: &str, value: &str) -> Option<BackendSpec> {
    if name.is_empty() {
        return None;
    }
    let mut parts = value.splitn(3, ',').map(str::trim);
    let base_url = parts.next().filter(|s| !s.is_empty())?;
    let api_key = parts.next().filter(|s| !s.is_empty())?;
    let model = parts.next().filter(|s| !s.is_empty())?;
    Some(BackendSpec {
        name: name.to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: api_key.to_string(),
        model: model.to_string(),
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
