//! OpenAI-compatible streaming chat completions client.
//!
//! DESIGN
//! ======
//! `POST {base_url}/chat/completions` with `stream: true`. The response body
//! is server-sent events; each `data:` payload is a completion chunk and
//! `data: [DONE]` terminates the stream. Bytes arrive in arbitrary splits, so
//! [`SseDecoder`] buffers until a full event (blank-line terminated) is seen.
//!
//! Dropping the returned [`TokenStream`] drops the response body, which
//! closes the connection and aborts generation upstream.

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::config::{BackendSpec, LlmTimeouts};
use super::types::{ChatBackend, ChatMessage, LlmError, TokenChunk, TokenStream};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the HTTP client cannot be constructed.
    pub fn new(spec: &BackendSpec, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        // Whole-request timeouts would cut long replies; bound idle reads instead.
        let http = reqwest::Client::builder()
            .read_timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            api_key: spec.api_key.clone(),
            base_url: spec.base_url.trim_end_matches('/').to_string(),
            model: spec.model.clone(),
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiClient {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CcStreamRequest { model: &self.model, messages, stream: true };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiResponse { status: status.as_u16(), body });
        }
        Ok(decode_token_stream(response.bytes_stream().boxed()))
    }
}

// =============================================================================
// CHAT COMPLETIONS WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CcStreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CcChunk {
    #[serde(default)]
    choices: Vec<CcChoice>,
}

#[derive(Deserialize)]
struct CcChoice {
    #[serde(default)]
    delta: CcDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct CcDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    Chunk(TokenChunk),
    Done,
}

/// Parse one `data:` payload.
pub(crate) fn parse_stream_event(data: &str) -> Result<StreamEvent, LlmError> {
    if data.trim() == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let chunk: CcChunk = serde_json::from_str(data).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        // EDGE: usage-only and keep-alive chunks carry no choices.
        return Ok(StreamEvent::Chunk(TokenChunk::default()));
    };
    Ok(StreamEvent::Chunk(TokenChunk {
        text: choice.delta.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    }))
}

// =============================================================================
// SSE DECODING
// =============================================================================

/// Incremental server-sent-events splitter yielding `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    /// Feed raw bytes; returns the data payload of every completed event.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        // EDGE: a multi-byte character may straddle two network chunks.
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let complete: Vec<u8> = self.pending.drain(..valid).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&complete));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut out = Vec::new();
        while let Some(idx) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..idx + 2).collect();
            let data = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect::<Vec<_>>()
                .join("\n");
            if !data.is_empty() {
                out.push(data);
            }
        }
        out
    }
}

struct DecodeState<B, E> {
    bytes: BoxStream<'static, Result<B, E>>,
    decoder: SseDecoder,
    queue: VecDeque<Result<TokenChunk, LlmError>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into a token stream.
pub(crate) fn decode_token_stream<B, E>(bytes: BoxStream<'static, Result<B, E>>) -> TokenStream
where
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState { bytes, decoder: SseDecoder::default(), queue: VecDeque::new(), finished: false };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    for data in st.decoder.push(bytes.as_ref()) {
                        match parse_stream_event(&data) {
                            Ok(StreamEvent::Chunk(chunk)) => st.queue.push_back(Ok(chunk)),
                            Ok(StreamEvent::Done) => {
                                st.finished = true;
                                break;
                            }
                            Err(e) => {
                                st.queue.push_back(Err(e));
                                st.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.queue.push_back(Err(LlmError::ApiRequest(e.to_string())));
                    st.finished = true;
                }
                None => st.finished = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;
