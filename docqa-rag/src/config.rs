//! Configuration for the RAG pipeline.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// What the synthesizer does when retrieval finds no relevant passage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Fail with [`RagError::EmptyContext`] without calling the model.
    Strict,
    /// Call the model anyway; the prompt tells it to say the context lacks the answer.
    #[default]
    Permissive,
}

impl FromStr for ContextPolicy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(RagError::Config(format!(
                "unknown context policy '{other}' (expected 'strict' or 'permissive')"
            ))),
        }
    }
}

/// How the document text is split into chunks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Prefer paragraph, sentence and word boundaries, cutting hard only when none fits.
    #[default]
    Recursive,
    /// Cut at exactly `chunk_size` characters.
    Fixed,
}

/// Bounded exponential backoff for embedding calls made while building the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after every further failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// The delay to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Splitting strategy used when the pipeline builds its own chunker.
    pub chunk_strategy: ChunkStrategy,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for a result to count as relevant.
    pub similarity_threshold: f32,
    /// Upper bound on every embedding and generation call.
    pub request_timeout: Duration,
    /// Behaviour when no relevant context is retrieved.
    pub context_policy: ContextPolicy,
    /// Maximum number of texts sent in one embedding request.
    pub embed_batch_size: usize,
    /// Retry policy for embedding calls during index build.
    pub ingest_retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 20,
            chunk_strategy: ChunkStrategy::default(),
            top_k: 2,
            similarity_threshold: 0.0,
            request_timeout: Duration::from_secs(30),
            context_policy: ContextPolicy::default(),
            embed_batch_size: 100,
            ingest_retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Build a configuration from the defaults overlaid with `DOCQA_*`
    /// environment variables.
    ///
    /// Recognized variables: `DOCQA_CHUNK_SIZE`, `DOCQA_CHUNK_OVERLAP`,
    /// `DOCQA_CHUNK_STRATEGY`, `DOCQA_TOP_K`, `DOCQA_SIMILARITY_THRESHOLD`,
    /// `DOCQA_REQUEST_TIMEOUT_SECS`, `DOCQA_CONTEXT_POLICY`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a variable does not parse or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(size) = parse_var(&lookup, "DOCQA_CHUNK_SIZE")? {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = parse_var(&lookup, "DOCQA_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(overlap);
        }
        if let Some(strategy) = lookup("DOCQA_CHUNK_STRATEGY") {
            let strategy = match strategy.trim().to_ascii_lowercase().as_str() {
                "recursive" => ChunkStrategy::Recursive,
                "fixed" => ChunkStrategy::Fixed,
                other => {
                    return Err(RagError::Config(format!(
                        "unknown chunk strategy '{other}' (expected 'recursive' or 'fixed')"
                    )));
                }
            };
            builder = builder.chunk_strategy(strategy);
        }
        if let Some(k) = parse_var(&lookup, "DOCQA_TOP_K")? {
            builder = builder.top_k(k);
        }
        if let Some(threshold) = parse_var(&lookup, "DOCQA_SIMILARITY_THRESHOLD")? {
            builder = builder.similarity_threshold(threshold);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DOCQA_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(policy) = lookup("DOCQA_CONTEXT_POLICY") {
            builder = builder.context_policy(policy.parse()?);
        }

        builder.build()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| RagError::Config(format!("invalid value '{raw}' for {key}: {e}")))
        })
        .transpose()
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunk_strategy = strategy;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity a result needs to count as relevant.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the timeout applied to every embedding and generation call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the policy for questions with no relevant context.
    pub fn context_policy(mut self, policy: ContextPolicy) -> Self {
        self.config.context_policy = policy;
        self
    }

    /// Set the maximum number of texts per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the retry policy for embedding calls during index build.
    pub fn ingest_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.ingest_retry = retry;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0`
    /// - `ingest_retry.max_attempts == 0`
    /// - `request_timeout` is zero
    /// - `similarity_threshold` is NaN
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl RagConfig {
    /// Check that the parameters are consistent; see [`RagConfigBuilder::build`].
    pub fn validate(&self) -> Result<()> {
        let config = self;
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if config.embed_batch_size == 0 {
            return Err(RagError::Config("embed_batch_size must be greater than zero".to_string()));
        }
        if config.ingest_retry.max_attempts == 0 {
            return Err(RagError::Config(
                "ingest_retry.max_attempts must be at least one".to_string(),
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(RagError::Config("request_timeout must be non-zero".to_string()));
        }
        if config.similarity_threshold.is_nan() {
            return Err(RagError::Config("similarity_threshold must be a number".to_string()));
        }
        Ok(())
    }
}
