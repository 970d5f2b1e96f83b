//! Process configuration parsed from environment variables.
//!
//! Every numeric knob falls back to its default when unset or unparsable.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GENERATION_LIVENESS_SECS: u64 = 15;
const DEFAULT_FEED_STALENESS_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Tuning for background generation tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Hard ceiling on one reply; the message is finalized as interrupted.
    pub timeout: Duration,
    /// Head re-read period while no persistence write is outstanding.
    pub liveness_interval: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            liveness_interval: Duration::from_secs(DEFAULT_GENERATION_LIVENESS_SECS),
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(env_parse("GENERATION_TIMEOUT_SECS", DEFAULT_GENERATION_TIMEOUT_SECS)),
            liveness_interval: Duration::from_secs(
                env_parse("GENERATION_LIVENESS_SECS", DEFAULT_GENERATION_LIVENESS_SECS).max(1),
            ),
        }
    }
}

/// Tuning for the update feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// An incomplete reply older than this is shown as interrupted.
    pub staleness: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { staleness: Duration::from_secs(DEFAULT_FEED_STALENESS_SECS) }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self { staleness: Duration::from_secs(env_parse("FEED_STALENESS_SECS", DEFAULT_FEED_STALENESS_SECS)) }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// PostgreSQL store when set; in-memory store otherwise.
    pub database_url: Option<String>,
    /// Workspace `/` redirects to.
    pub default_workspace: Option<String>,
    pub shutdown_grace: Duration,
    pub generation: GenerationConfig,
    pub feed: FeedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            default_workspace: None,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            generation: GenerationConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl AppConfig {
    /// - `PORT`: listen port (default 3000)
    /// - `DATABASE_URL`: optional PostgreSQL URL
    /// - `CHATSPACE_DEFAULT_WORKSPACE`: optional redirect target for `/`
    /// - `SHUTDOWN_GRACE_SECS`: time granted to in-flight replies on shutdown
    /// - `GENERATION_TIMEOUT_SECS`, `GENERATION_LIVENESS_SECS`, `FEED_STALENESS_SECS`
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: env_nonempty("DATABASE_URL"),
            default_workspace: env_nonempty("CHATSPACE_DEFAULT_WORKSPACE"),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)),
            generation: GenerationConfig::from_env(),
            feed: FeedConfig::from_env(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
