//! Deterministic fakes shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{
    Document, DocumentLoader, EmbeddingProvider, GenerationRequest, Generator, IndexEntry,
    InMemoryVectorIndex, RagError, Result, SearchResult, VectorIndex,
};

pub const SKY_CORPUS: &str = "The sky is blue. Grass is green.";
pub const NO_CONTEXT_ANSWER: &str = "The context does not contain the information.";

const VOCABULARY: &[&str] = &["sky", "blue", "grass", "green", "color", "capital", "france", "paris"];

/// One dimension per vocabulary word; 1.0 when the word occurs in the text.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCABULARY.iter().map(|word| if lower.contains(word) { 1.0 } else { 0.0 }).collect()
}

/// Embeds by keyword presence. Questions containing "explode" fail.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("explode") {
            return Err(RagError::EmbeddingService {
                provider: "keyword".into(),
                message: "refused to embed".into(),
            });
        }
        Ok(keyword_vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Fails the first `failures` batch calls with a service error, then embeds by keyword.
pub struct FlakyEmbedder {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Self {
        Self { failures, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keyword_vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(RagError::EmbeddingService {
                provider: "flaky".into(),
                message: format!("unavailable (call {call})"),
            });
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Never answers a query embedding within any reasonable timeout.
pub struct StalledQueryEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledQueryEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Answers with the first context passage, or a fixed refusal when there is none.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request.context.first().cloned().unwrap_or_else(|| NO_CONTEXT_ANSWER.to_string()))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Echoes like [`EchoGenerator`], but fails questions containing "unlucky".
#[derive(Default)]
pub struct UnluckyGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Generator for UnluckyGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.question.contains("unlucky") {
            return Err(RagError::GenerationService {
                provider: "unlucky".into(),
                message: "model unavailable".into(),
            });
        }
        Ok(request.context.first().cloned().unwrap_or_else(|| NO_CONTEXT_ANSWER.to_string()))
    }

    fn name(&self) -> &str {
        "unlucky"
    }
}

/// Takes an hour to answer.
pub struct SlowGenerator;

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Serves a different corpus on each load; fails once the list is exhausted.
pub struct SequenceLoader {
    corpora: Vec<Vec<Document>>,
    pub loads: AtomicUsize,
    delay: Duration,
}

impl SequenceLoader {
    pub fn new(corpora: Vec<Vec<Document>>) -> Self {
        Self { corpora, loads: AtomicUsize::new(0), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DocumentLoader for SequenceLoader {
    async fn load_corpus(&self) -> Result<Vec<Document>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let load = self.loads.fetch_add(1, Ordering::SeqCst);
        self.corpora
            .get(load)
            .cloned()
            .ok_or_else(|| RagError::Ingest(format!("corpus {load} is unavailable")))
    }
}

pub fn sky_corpus() -> Vec<Document> {
    vec![Document::new("data.txt", SKY_CORPUS)]
}

/// An in-memory index that also accepts incremental adds.
#[derive(Default)]
pub struct AppendableIndex {
    inner: InMemoryVectorIndex,
}

#[async_trait]
impl VectorIndex for AppendableIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>> {
        self.inner.add(entries).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.inner.search(query, k).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "appendable"
    }
}
