//! LLM types: provider-neutral chat messages, stream chunks and errors.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by backend client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The HTTP request to the provider failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// A streamed event could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::error::ErrorCode for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

// =============================================================================
// STREAMING
// =============================================================================

/// Incremental piece of a streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenChunk {
    /// Text delta, possibly empty.
    pub text: String,
    /// Set on the chunk that ends the reply normally.
    pub finish_reason: Option<String>,
}

impl TokenChunk {
    #[cfg(test)]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), finish_reason: None }
    }

    #[cfg(test)]
    #[must_use]
    pub fn finish(reason: impl Into<String>) -> Self {
        Self { text: String::new(), finish_reason: Some(reason.into()) }
    }

    #[must_use]
    pub fn is_finish(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Token stream of one generation. Dropping it aborts the underlying request.
pub type TokenStream = BoxStream<'static, Result<TokenChunk, LlmError>>;

/// Provider-neutral streaming chat backend. Enables mocking in tests.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streamed completion for `messages`.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request cannot be started or the
    /// provider rejects it before streaming begins.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
