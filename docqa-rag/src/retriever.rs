//! Query-time retrieval: embed the question, search the index.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::SearchResult;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

/// Wraps a [`VectorIndex`] with the query-time contract.
///
/// Given a fixed index and a fixed question embedding, `retrieve` is
/// deterministic. Results scoring below `similarity_threshold` are dropped,
/// so the returned list holds only passages considered relevant.
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    similarity_threshold: f32,
}

impl Retriever {
    /// Create a retriever over `index`.
    pub fn new(embedder: Embedder, index: Arc<dyn VectorIndex>, similarity_threshold: f32) -> Self {
        Self { embedder, index, similarity_threshold }
    }

    /// Return the underlying index.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Embed `question` and return up to `k` relevant passages, most similar first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `k == 0`, the embedding error if the
    /// question cannot be embedded (no retry at query time), and the index
    /// error if the search fails.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }

        let query_vector = self.embedder.embed_one(question).await?;

        let results = self.index.search(&query_vector, k).await.map_err(|e| {
            error!(index = self.index.name(), error = %e, "vector search failed");
            e
        })?;

        let threshold = self.similarity_threshold;
        let relevant: Vec<SearchResult> =
            results.into_iter().filter(|r| r.score >= threshold).collect();

        debug!(
            top_score = ?relevant.first().map(|r| r.score),
            result_count = relevant.len(),
            "retrieval completed"
        );
        Ok(relevant)
    }
}
