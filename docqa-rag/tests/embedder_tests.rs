//! Tests for the batching and timeout wrapper around embedding providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{Embedder, EmbeddingProvider, RagError, Result};

/// Returns a one-dimensional vector holding the text length.
#[derive(Default)]
struct LengthEmbedder {
    batches: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32])
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }

    fn name(&self) -> &str {
        "length"
    }
}

/// Drops the last vector of every batch.
struct LossyEmbedder;

#[async_trait]
impl EmbeddingProvider for LossyEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
    }

    fn name(&self) -> &str {
        "lossy"
    }
}

#[tokio::test]
async fn splits_into_batches_and_keeps_order() {
    let provider = Arc::new(LengthEmbedder::default());
    let embedder = Embedder::new(provider.clone(), 2, Duration::from_secs(1));

    let vectors = embedder.embed(&["a", "bb", "ccc", "dddd", "eeeee"]).await.unwrap();

    assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]]);
    assert_eq!(provider.batches.load(Ordering::SeqCst), 3);
}

/// Answers every batch with the right number of vectors, all empty.
struct HollowEmbedder;

#[async_trait]
impl EmbeddingProvider for HollowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0])
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![Vec::new(); texts.len()])
    }

    fn name(&self) -> &str {
        "hollow"
    }
}

#[tokio::test]
async fn empty_batch_vector_is_a_retryable_service_error() {
    let embedder = Embedder::new(Arc::new(HollowEmbedder), 10, Duration::from_secs(1));
    let err = embedder.embed(&["the sky is blue"]).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { .. }), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn wrong_vector_count_is_a_service_error() {
    let embedder = Embedder::new(Arc::new(LossyEmbedder), 10, Duration::from_secs(1));
    let err = embedder.embed(&["a", "b"]).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { .. }), "got {err:?}");
}

#[tokio::test]
async fn empty_query_vector_is_a_service_error() {
    let embedder = Embedder::new(Arc::new(LossyEmbedder), 10, Duration::from_secs(1));
    assert!(matches!(
        embedder.embed_one("question").await,
        Err(RagError::EmbeddingService { .. })
    ));
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let provider = Arc::new(LengthEmbedder::default());
    let embedder = Embedder::new(provider.clone(), 4, Duration::from_secs(1));
    assert!(embedder.embed(&[]).await.unwrap().is_empty());
    assert_eq!(provider.batches.load(Ordering::SeqCst), 0);
}
