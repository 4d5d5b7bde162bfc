//! Gemini embedding and generation over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::synthesizer::{GenerationRequest, Generator};

const PROVIDER: &str = "Gemini";

/// The default Generative Language API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// The default generation model.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";

/// Read the API key from `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .ok()
        .filter(|key| !key.trim().is_empty())
}

/// Shared HTTP plumbing for both Gemini clients.
#[derive(Clone)]
struct GeminiHttp {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiHttp {
    fn new(api_key: &str, model: &str) -> std::result::Result<Self, String> {
        if api_key.trim().is_empty() {
            return Err("API key must not be empty".to_string());
        }
        let key = HeaderValue::from_str(api_key).map_err(|e| format!("invalid API key: {e}"))?;
        let headers = HeaderMap::from_iter([(HeaderName::from_static("x-goog-api-key"), key)]);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| format!("failed to create HTTP client: {e}"))?;
        Ok(Self { client, base_url: DEFAULT_BASE_URL.to_string(), model: model.to_string() })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url.trim_end_matches('/'), self.model)
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    /// POST `body` and return the raw success body, or a message describing the failure.
    async fn post<B: Serialize>(&self, method: &str, body: &B) -> std::result::Result<String, String> {
        let response = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| format!("failed to read response: {e}"))?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(format!("API returned {status}: {detail}"));
        }
        Ok(text)
    }
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(text: &str, role: Option<&str>) -> Self {
        Self { role: role.map(str::to_string), parts: vec![Part { text: text.to_string() }] }
    }
}

#[derive(Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    model: String,
    content: Content,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<u32>,
}

#[derive(Serialize)]
struct BatchEmbedContentsRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn parse_embedding(body: &str) -> std::result::Result<Vec<f32>, String> {
    serde_json::from_str::<EmbedContentResponse>(body)
        .map(|r| r.embedding.values)
        .map_err(|e| format!("failed to parse response: {e}"))
}

fn parse_batch_embeddings(body: &str) -> std::result::Result<Vec<Vec<f32>>, String> {
    serde_json::from_str::<BatchEmbedContentsResponse>(body)
        .map(|r| r.embeddings.into_iter().map(|e| e.values).collect())
        .map_err(|e| format!("failed to parse response: {e}"))
}

/// Concatenate the text parts of the first candidate.
fn parse_answer(body: &str) -> std::result::Result<String, String> {
    let response = serde_json::from_str::<GenerateContentResponse>(body)
        .map_err(|e| format!("failed to parse response: {e}"))?;
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect::<String>())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err("response contained no answer".to_string());
    }
    Ok(text)
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingService { provider: PROVIDER.into(), message }
}

fn generation_error(message: String) -> RagError {
    RagError::GenerationService { provider: PROVIDER.into(), message }
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Documents are embedded with the `RETRIEVAL_DOCUMENT` task type through
/// `batchEmbedContents`; questions with `RETRIEVAL_QUERY` through
/// `embedContent`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new("your-api-key")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Clone)]
pub struct GeminiEmbeddingProvider {
    http: GeminiHttp,
    output_dimensionality: Option<u32>,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for the default `gemini-embedding-001` model.
    pub fn new(api_key: impl AsRef<str>) -> Result<Self> {
        let http = GeminiHttp::new(api_key.as_ref(), DEFAULT_EMBEDDING_MODEL)
            .map_err(embedding_error)?;
        Ok(Self { http, output_dimensionality: None })
    }

    /// Create a provider using `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = api_key_from_env().ok_or_else(|| {
            embedding_error("GEMINI_API_KEY or GOOGLE_API_KEY must be set".to_string())
        })?;
        Self::new(key)
    }

    /// Set the embedding model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.http.model = model.into();
        self
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http.base_url = base_url.into();
        self
    }

    /// Truncate output vectors to `dims` values.
    pub fn with_output_dimensionality(mut self, dims: u32) -> Self {
        self.output_dimensionality = Some(dims);
        self
    }

    fn request(&self, text: &str, task_type: TaskType) -> EmbedContentRequest {
        EmbedContentRequest {
            model: self.http.model_path(),
            content: Content::text(text, None),
            task_type,
            output_dimensionality: self.output_dimensionality,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        self.http
            .post("embedContent", &self.request(text, TaskType::RetrievalQuery))
            .await
            .and_then(|body| parse_embedding(&body))
            .map_err(|message| {
                error!(provider = PROVIDER, %message, "embedding request failed");
                embedding_error(message)
            })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.http.model, "embedding batch");

        let request = BatchEmbedContentsRequest {
            requests: texts.iter().map(|t| self.request(t, TaskType::RetrievalDocument)).collect(),
        };
        self.http
            .post("batchEmbedContents", &request)
            .await
            .and_then(|body| parse_batch_embeddings(&body))
            .map_err(|message| {
                error!(provider = PROVIDER, %message, "batch embedding request failed");
                embedding_error(message)
            })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// A [`Generator`] backed by Gemini `generateContent`.
///
/// The instructions travel as the system instruction and the rendered prompt
/// as a single user turn.
#[derive(Clone)]
pub struct GeminiGenerator {
    http: GeminiHttp,
}

impl GeminiGenerator {
    /// Create a generator for the default `gemini-1.5-flash` model.
    pub fn new(api_key: impl AsRef<str>) -> Result<Self> {
        let http = GeminiHttp::new(api_key.as_ref(), DEFAULT_GENERATION_MODEL)
            .map_err(generation_error)?;
        Ok(Self { http })
    }

    /// Create a generator using `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = api_key_from_env().ok_or_else(|| {
            generation_error("GEMINI_API_KEY or GOOGLE_API_KEY must be set".to_string())
        })?;
        Self::new(key)
    }

    /// Set the generation model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.http.model = model.into();
        self
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(provider = PROVIDER, model = %self.http.model, prompt_len = request.prompt.len(), "generating answer");

        let body = GenerateContentRequest {
            system_instruction: Content::text(&request.instructions, None),
            contents: vec![Content::text(&request.prompt, Some("user"))],
        };
        self.http
            .post("generateContent", &body)
            .await
            .and_then(|body| parse_answer(&body))
            .map_err(|message| {
                error!(provider = PROVIDER, %message, "generation request failed");
                generation_error(message)
            })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
