//! In-memory vector index using cosine similarity.
//!
//! This module provides [`InMemoryVectorIndex`], a zero-dependency index
//! backed by a `Vec` protected by a `tokio::sync::RwLock`. Search is an
//! exhaustive scan, which is fine for the small corpora it is meant for.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{IndexEntry, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorIndex, l2_norm};

#[derive(Debug)]
struct StoredEntry {
    vector: Vec<f32>,
    norm: f32,
    text: String,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct IndexState {
    dimensions: Option<usize>,
    // Position in this Vec is the entry id.
    entries: Vec<StoredEntry>,
}

/// An in-memory vector index using cosine similarity for search.
///
/// Any number of searches may run concurrently; `add` takes the write lock
/// briefly and commits all of its entries at once.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.add(entries).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    state: RwLock<IndexState>,
}

impl InMemoryVectorIndex {
    /// Create a new empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dimensionality fixed by the first add, if any.
    pub async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimensions
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>> {
        let mut state = self.state.write().await;

        let expected = state.dimensions.or_else(|| entries.first().map(|e| e.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
                return Err(RagError::DimensionMismatch { expected, actual: bad.vector.len() });
            }
            if expected == 0 {
                return Err(RagError::VectorStore {
                    backend: "InMemory".to_string(),
                    message: "cannot index zero-length vectors".to_string(),
                });
            }
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        state.dimensions = expected;
        let first_id = state.entries.len() as u64;
        let count = entries.len() as u64;
        state.entries.extend(entries.into_iter().map(|entry| StoredEntry {
            norm: l2_norm(&entry.vector),
            vector: entry.vector,
            text: entry.text,
            metadata: entry.metadata,
        }));

        Ok((first_id..first_id + count).collect())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        if k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.dimensions {
            if query.len() != expected {
                return Err(RagError::DimensionMismatch { expected, actual: query.len() });
            }
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(u64, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(id, entry)| {
                let score = if query_norm == 0.0 || entry.norm == 0.0 {
                    0.0
                } else {
                    let dot: f32 = entry.vector.iter().zip(query).map(|(x, y)| x * y).sum();
                    dot / (entry.norm * query_norm)
                };
                (id as u64, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        let results = scored
            .into_iter()
            .map(|(id, score)| {
                let entry = &state.entries[id as usize];
                SearchResult {
                    id,
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score,
                }
            })
            .collect();
        Ok(results)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.entries.len())
    }

    fn name(&self) -> &str {
        "InMemory"
    }
}
