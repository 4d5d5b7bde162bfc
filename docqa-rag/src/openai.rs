//! OpenAI embedding and chat-completion providers.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::synthesizer::{GenerationRequest, Generator};

const PROVIDER: &str = "OpenAI";

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

fn api_key_from_env() -> std::result::Result<String, String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| "OPENAI_API_KEY environment variable not set".to_string())
}

fn check_api_key(api_key: String) -> std::result::Result<String, String> {
    if api_key.trim().is_empty() {
        return Err("API key must not be empty".to_string());
    }
    Ok(api_key)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

/// POST `body` with bearer auth and return the raw success body.
async fn post_json<B: Serialize>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> std::result::Result<String, String> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| format!("failed to read response: {e}"))?;
    if !status.is_success() {
        let detail =
            serde_json::from_str::<ErrorResponse>(&text).map(|e| e.error.message).unwrap_or(text);
        return Err(format!("API returned {status}: {detail}"));
    }
    Ok(text)
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Parse an embeddings response, restoring input order from each item's `index`.
fn parse_embeddings(body: &str) -> std::result::Result<Vec<Vec<f32>>, String> {
    let mut response = serde_json::from_str::<EmbeddingResponse>(body)
        .map_err(|e| format!("failed to parse response: {e}"))?;
    if response.data.iter().all(|d| d.index.is_some()) {
        response.data.sort_by_key(|d| d.index);
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

fn parse_chat_answer(body: &str) -> std::result::Result<String, String> {
    let response = serde_json::from_str::<ChatResponse>(body)
        .map_err(|e| format!("failed to parse response: {e}"))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| "response contained no answer".to_string())
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Uses `reqwest` to call the `/v1/embeddings` endpoint directly.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
/// - `base_url` – defaults to `https://api.openai.com/v1`; any compatible server works.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Clone)]
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = check_api_key(api_key.into()).map_err(embedding_error)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            request_dimensions: None,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env().map_err(embedding_error)?)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the provider at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.request_dimensions = Some(dims);
        self
    }
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingService { provider: PROVIDER.into(), message }
}

fn generation_error(message: String) -> RagError {
    RagError::GenerationService { provider: PROVIDER.into(), message }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("API returned empty response".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };
        let url = endpoint(&self.base_url, "embeddings");

        post_json(&self.client, &url, &self.api_key, &request_body)
            .await
            .and_then(|body| parse_embeddings(&body))
            .map_err(|message| {
                error!(provider = PROVIDER, %message, "embedding request failed");
                embedding_error(message)
            })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// A [`Generator`] backed by `/v1/chat/completions`.
///
/// The instructions are sent as the system message and the rendered prompt
/// as the user message.
#[derive(Clone)]
pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIGenerator {
    /// Create a generator with the given API key and the default `gpt-4o-mini` model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = check_api_key(api_key.into()).map_err(generation_error)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_CHAT_MODEL.into(),
        })
    }

    /// Create a generator using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env().map_err(generation_error)?)
    }

    /// Set the chat model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the generator at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn chat_request<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.instructions },
                ChatMessage { role: "user", content: &request.prompt },
            ],
        }
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(provider = PROVIDER, model = %self.model, prompt_len = request.prompt.len(), "generating answer");

        let url = endpoint(&self.base_url, "chat/completions");
        post_json(&self.client, &url, &self.api_key, &self.chat_request(request))
            .await
            .and_then(|body| parse_chat_answer(&body))
            .map_err(|message| {
                error!(provider = PROVIDER, %message, "chat completion failed");
                generation_error(message)
            })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_reordered_by_index() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","index":1,"embedding":[0.0,1.0]},
            {"object":"embedding","index":0,"embedding":[1.0,0.0]}
        ]}"#;
        assert_eq!(parse_embeddings(body).unwrap(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn malformed_embeddings_are_an_error() {
        assert!(parse_embeddings(r#"{"data":[{"embedding":"oops"}]}"#).is_err());
    }

    #[test]
    fn chat_request_sends_instructions_as_system_message() {
        let generator = OpenAIGenerator::new("sk-test").unwrap();
        let request = GenerationRequest {
            instructions: "Only use the context.".into(),
            prompt: "Question: What color is the sky?".into(),
            context: vec![],
            question: "What color is the sky?".into(),
        };
        let json = serde_json::to_value(generator.chat_request(&request)).unwrap();
        assert_eq!(json["model"], DEFAULT_CHAT_MODEL);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Question: What color is the sky?");
    }

    #[test]
    fn chat_answer_requires_content() {
        let ok = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Blue."}}]}"#;
        assert_eq!(parse_chat_answer(ok).unwrap(), "Blue.");
        assert!(parse_chat_answer(r#"{"choices":[]}"#).is_err());
        assert!(
            parse_chat_answer(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .is_err()
        );
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://localhost:8080/v1/", "embeddings"), "http://localhost:8080/v1/embeddings");
    }
}
