//! Embedding provider trait for generating vector embeddings from text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Gemini, OpenAI, etc.)
/// behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// `embed_batch` must return exactly one vector per input, in input order.
/// Providers never drop or reorder results; a response that cannot honor this
/// is an [`EmbeddingService`](crate::RagError::EmbeddingService) error.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input, typically a query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// A short name used in logs and error messages.
    fn name(&self) -> &str;
}

/// The pipeline's view of an [`EmbeddingProvider`].
///
/// Splits large inputs into batches of at most `batch_size` texts, bounds
/// every request by `timeout`, and checks that each response has one
/// non-empty vector per input.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl Embedder {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, timeout: Duration) -> Self {
        Self { provider, batch_size: batch_size.max(1), timeout }
    }

    /// Return the wrapped provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed every text, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingTimeout`] if a request exceeds the timeout
    /// and [`RagError::EmbeddingService`] if the provider fails, returns the
    /// wrong number of vectors, or returns an empty vector.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(provider = self.provider.name(), batch_size = batch.len(), "embedding batch");
            let embedded = self.bounded(self.provider.embed_batch(batch)).await?;
            if embedded.len() != batch.len() {
                error!(
                    provider = self.provider.name(),
                    expected = batch.len(),
                    actual = embedded.len(),
                    "embedding response has wrong length"
                );
                return Err(RagError::EmbeddingService {
                    provider: self.provider.name().to_string(),
                    message: format!(
                        "expected {} vectors, response contained {}",
                        batch.len(),
                        embedded.len()
                    ),
                });
            }
            if let Some(position) = embedded.iter().position(Vec::is_empty) {
                error!(provider = self.provider.name(), position, "embedding response has an empty vector");
                return Err(RagError::EmbeddingService {
                    provider: self.provider.name().to_string(),
                    message: format!("response contained an empty vector at position {position}"),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Embed a single text, typically a question.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.bounded(self.provider.embed(text)).await?;
        if vector.is_empty() {
            return Err(RagError::EmbeddingService {
                provider: self.provider.name().to_string(),
                message: "response contained an empty vector".to_string(),
            });
        }
        Ok(vector)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call).await.map_err(|_| {
            error!(provider = self.provider.name(), timeout = ?self.timeout, "embedding timed out");
            RagError::EmbeddingTimeout {
                provider: self.provider.name().to_string(),
                timeout: self.timeout,
            }
        })?
    }
}
