//! Language-model service client: the external-transform seam.
//!
//! The Transform Runner depends only on the [`ChatClient`] trait, which
//! exposes both a single-shot and an incremental mode. Streaming is not an
//! optimisation here — it is what makes cancellation responsive: a
//! cancellation flag raised mid-call takes effect at the next token instead
//! of waiting minutes for an 80 000-character response to finish.
//!
//! [`OpenAiChatClient`] is the production implementation, speaking the
//! OpenAI-compatible chat-completions protocol that every relevant inference
//! backend (OpenAI, Azure, vLLM, LM Studio, qwen endpoints, …) accepts.
//! Tests inject scripted [`ChatClient`] impls instead.

use crate::error::{BookmillError, LlmError};
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// A boxed stream of incremental output tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Per-call completion options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Sampling temperature. Translation wants low-but-nonzero: 0.3 keeps
    /// phrasing natural without inviting the model to paraphrase structure.
    pub temperature: f32,
    /// Generation cap; `None` lets the provider default apply.
    pub max_tokens: Option<usize>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: None,
        }
    }
}

/// The external language-model service, reduced to the two call shapes the
/// pipeline needs.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// One-shot completion: returns the full response text.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, LlmError>;

    /// Incremental completion: yields output tokens as the service produces
    /// them. Callers consume the stream even when they only want the final
    /// text, so cooperative cancellation can interrupt between tokens.
    async fn complete_stream(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<TokenStream, LlmError>;
}

// ── Wire types (OpenAI-compatible chat completions) ──────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

// ── Production client ────────────────────────────────────────────────────

/// OpenAI-compatible chat client configured from explicit values or the
/// `LLM_BASE_URL` / `LLM_API_KEY` / `LLM_DEFAULT_MODEL` environment.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Configure from the environment.
    ///
    /// * `LLM_BASE_URL` — default `https://api.openai.com/v1`
    /// * `LLM_API_KEY` — bearer token
    /// * `LLM_DEFAULT_MODEL` — falls back to the first entry of `LLM_MODELS`,
    ///   then to `gpt-4o-mini`
    pub fn from_env() -> Result<Self, BookmillError> {
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let model = std::env::var("LLM_DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .or_else(|| available_models().into_iter().next())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        Ok(Self::new(base_url, api_key, model))
    }

    /// The model this client sends requests for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Same endpoint and key, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: model.into(),
        }
    }

    fn build_request(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
        stream: bool,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(WireMessage {
            role: "user".to_string(),
            content: user.to_string(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let err = LlmError::Api {
                status: status.as_u16(),
                detail: detail.clone(),
            };
            // Normalise provider-specific context overflow messages into the
            // dedicated variant so callers can trigger truncate-and-retry.
            if err.exceeds_context() {
                return Err(LlmError::ContextLength { detail });
            }
            return Err(err);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let body = self.build_request(system, user, options, false);
        let response = self.send(&body).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty choices".to_string()))
    }

    async fn complete_stream(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<TokenStream, LlmError> {
        let body = self.build_request(system, user, options, true);
        let response = self.send(&body).await?;

        // SSE body: `data: {json}\n` lines, terminated by `data: [DONE]`.
        // Network chunks respect neither line nor UTF-8 boundaries, so the
        // carry buffer holds raw bytes and only complete lines are decoded.
        let byte_stream = response.bytes_stream();
        let token_stream = byte_stream
            .scan(Vec::new(), |carry: &mut Vec<u8>, chunk_result| {
                let out: Vec<Result<String, LlmError>> = match chunk_result {
                    Ok(bytes) => {
                        carry.extend_from_slice(&bytes);
                        let mut tokens = Vec::new();
                        while let Some(nl) = carry.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = carry.drain(..=nl).collect();
                            let line = String::from_utf8_lossy(&line);
                            if let Some(token) = parse_sse_line(line.trim_end()) {
                                tokens.push(Ok(token));
                            }
                        }
                        tokens
                    }
                    Err(e) => vec![Err(LlmError::Network(e.to_string()))],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(token_stream))
    }
}

/// Extract the content token from one SSE line, if it carries one.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let chunk: ChatChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .first()
        .and_then(|c| c.delta.content.clone())
        .filter(|c| !c.is_empty())
}

/// Models advertised by the deployment, from `LLM_MODELS` (comma-separated).
pub fn available_models() -> Vec<String> {
    std::env::var("LLM_MODELS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_content_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"你好"}}]}"#;
        assert_eq!(parse_sse_line(line), Some("你好".to_string()));
    }

    #[test]
    fn parse_sse_done_sentinel() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
    }

    #[test]
    fn parse_sse_ignores_non_data_lines() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
    }

    #[test]
    fn parse_sse_ignores_empty_delta() {
        let line = r#"data: {"choices":[{"delta":{}}]}"#;
        assert_eq!(parse_sse_line(line), None);
        let line = r#"data: {"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(parse_sse_line(line), None);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiChatClient::new("http://localhost:8080/v1/", "k", "m");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn with_model_keeps_endpoint() {
        let client = OpenAiChatClient::new("http://h/v1", "k", "a");
        let other = client.with_model("b");
        assert_eq!(other.model(), "b");
        assert_eq!(other.base_url, client.base_url);
    }
}
