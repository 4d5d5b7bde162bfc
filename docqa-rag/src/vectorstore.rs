//! Vector index trait for storing and searching vector embeddings.

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::document::{IndexEntry, SearchResult};
use crate::error::Result;

/// A storage backend for vector embeddings with similarity search.
///
/// The first successful [`add`](VectorIndex::add) fixes the index's
/// dimensionality; later vectors of a different length are rejected with
/// [`DimensionMismatch`](crate::RagError::DimensionMismatch). Ids are assigned
/// sequentially and never reused.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// let ids = index.add(entries).await?;
/// let results = index.search(&query_embedding, 2).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add entries and return the ids assigned to them, in input order.
    ///
    /// Either every entry is added or none is.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>>;

    /// Return the `k` entries most similar to `query`.
    ///
    /// Results are ordered by descending cosine similarity, ties by ascending
    /// id. An empty index or `k == 0` yields an empty `Vec`.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize>;

    /// Whether entries may be appended after the initial build.
    fn supports_incremental(&self) -> bool {
        false
    }

    /// A short name used in logs and error messages.
    fn name(&self) -> &str;
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// The result ordering every index must produce: score descending, id ascending.
pub fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}
