//! Qdrant vector index backend.
//!
//! Provides [`QdrantVectorIndex`] which implements [`VectorIndex`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC. Unlike
//! the in-memory index it survives restarts and accepts incremental adds.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::qdrant::QdrantVectorIndex;
//!
//! let index = QdrantVectorIndex::new("http://localhost:6334", "docqa")?;
//! let ids = index.add(entries).await?;
//! let results = index.search(&query_embedding, 2).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{IndexEntry, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorIndex, rank_order};

const TEXT_FIELD: &str = "text";
const METADATA_FIELD: &str = "metadata";

/// What we know about the collection once it has been looked up.
#[derive(Debug, Clone, Copy)]
struct CollectionState {
    dimensions: Option<usize>,
    next_id: u64,
}

/// A [`VectorIndex`] backed by one [Qdrant](https://qdrant.tech/) collection.
///
/// The collection is created with cosine distance on the first add. Ids are
/// sequential integers continuing from the number of points already stored;
/// adds are serialized so ids never collide within one process.
///
/// Search results follow the same ordering as the in-memory index: score
/// descending, ties by ascending id, even when the tie straddles the k-th
/// position.
pub struct QdrantVectorIndex {
    client: Arc<Qdrant>,
    collection: String,
    state: Mutex<Option<CollectionState>>,
}

impl QdrantVectorIndex {
    /// Connect to the Qdrant server at `url` and use `collection`.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(map_err)?;
        Ok(Self::from_client(client, collection))
    }

    /// Use an existing client.
    pub fn from_client(client: Qdrant, collection: impl Into<String>) -> Self {
        Self { client: Arc::new(client), collection: collection.into(), state: Mutex::new(None) }
    }

    /// The collection this index reads and writes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// An index on the collection for build `generation`, sharing this client.
    ///
    /// Generation 0 is this index's own collection; later generations write
    /// into `{collection}-{generation}` so a rebuild starts from an empty
    /// collection while the committed one keeps serving.
    pub fn for_generation(&self, generation: u64) -> Self {
        let collection = match generation {
            0 => self.collection.clone(),
            n => format!("{}-{n}", self.collection),
        };
        Self { client: self.client.clone(), collection, state: Mutex::new(None) }
    }

    async fn load_state(&self) -> Result<CollectionState> {
        if !self.client.collection_exists(&self.collection).await.map_err(map_err)? {
            return Ok(CollectionState { dimensions: None, next_id: 0 });
        }

        let info = self.client.collection_info(&self.collection).await.map_err(map_err)?;
        let dimensions = info
            .result
            .and_then(|i| i.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                VectorsConfigKind::ParamsMap(_) => None,
            });

        let next_id = self.count().await? as u64;
        debug!(collection = %self.collection, ?dimensions, next_id, "loaded qdrant collection");
        Ok(CollectionState { dimensions, next_id })
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(map_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn create_collection(&self, dimensions: usize) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(map_err)?;
        info!(collection = %self.collection, dimensions, "created qdrant collection");
        Ok(())
    }
}

fn map_err(e: qdrant_client::QdrantError) -> RagError {
    RagError::VectorStore { backend: "qdrant".to_string(), message: e.to_string() }
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Decode a scored point. Points with UUID ids were not written by this index
/// and are skipped.
fn to_search_result(point: ScoredPoint) -> Option<SearchResult> {
    let id = match point.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => *n,
        PointIdOptions::Uuid(_) => return None,
    };
    let text = point.payload.get(TEXT_FIELD).and_then(extract_string).unwrap_or_default();
    let metadata: HashMap<String, String> = point
        .payload
        .get(METADATA_FIELD)
        .and_then(|v| match &v.kind {
            Some(Kind::StructValue(s)) => Some(
                s.fields
                    .iter()
                    .filter_map(|(k, v)| extract_string(v).map(|s| (k.clone(), s)))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();
    Some(SearchResult { id, text, metadata, score: point.score })
}

/// True when a full page of ranked results scores its last point the same as
/// the k-th, so more tied points with lower ids may lie beyond the page.
fn tie_continues_past_page(ranked: &[SearchResult], k: usize, limit: usize) -> bool {
    ranked.len() == limit
        && ranked.len() > k
        && ranked.last().map(|r| r.score) == ranked.get(k - 1).map(|r| r.score)
}

fn to_payload(entry: &IndexEntry) -> Result<Payload> {
    let metadata: serde_json::Map<String, serde_json::Value> = entry
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    let payload = serde_json::json!({
        TEXT_FIELD: entry.text,
        METADATA_FIELD: metadata,
    });
    Payload::try_from(payload).map_err(map_err)
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.state.lock().await;
        let mut state = match *guard {
            Some(state) => state,
            None => self.load_state().await?,
        };

        let dimensions = state.dimensions.unwrap_or(entries[0].vector.len());
        if dimensions == 0 {
            return Err(RagError::VectorStore {
                backend: "qdrant".to_string(),
                message: "cannot index zero-length vectors".to_string(),
            });
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimensions) {
            return Err(RagError::DimensionMismatch { expected: dimensions, actual: bad.vector.len() });
        }

        if state.dimensions.is_none() {
            self.create_collection(dimensions).await?;
            state.dimensions = Some(dimensions);
        }

        let first_id = state.next_id;
        let ids: Vec<u64> = (first_id..first_id + entries.len() as u64).collect();
        let points = entries
            .iter()
            .zip(&ids)
            .map(|(entry, id)| Ok(PointStruct::new(*id, entry.vector.clone(), to_payload(entry)?)))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(map_err)?;

        state.next_id = first_id + ids.len() as u64;
        *guard = Some(state);
        debug!(collection = %self.collection, count = ids.len(), first_id, "upserted entries to qdrant");
        Ok(ids)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 || !self.client.collection_exists(&self.collection).await.map_err(map_err)? {
            return Ok(Vec::new());
        }

        // One extra point shows whether the k-th score is tied past the cut.
        let mut limit = k.saturating_add(1);
        loop {
            let response = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&self.collection, query.to_vec(), limit as u64)
                        .with_payload(true),
                )
                .await
                .map_err(map_err)?;

            let mut results: Vec<SearchResult> =
                response.result.into_iter().filter_map(to_search_result).collect();
            results.sort_by(rank_order);

            if tie_continues_past_page(&results, k, limit) {
                debug!(
                    collection = %self.collection,
                    limit,
                    "k-th score tied to the page end, widening search"
                );
                limit = limit.saturating_mul(2);
                continue;
            }
            results.truncate(k);
            return Ok(results);
        }
    }

    async fn len(&self) -> Result<usize> {
        if !self.client.collection_exists(&self.collection).await.map_err(map_err)? {
            return Ok(0);
        }
        self.count().await
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use qdrant_client::qdrant::PointId;

    use super::*;

    fn scored(id: u64, score: f32, text: &str) -> ScoredPoint {
        let entry = IndexEntry {
            vector: vec![1.0],
            text: text.to_string(),
            metadata: HashMap::from([("source".to_string(), "data.txt".to_string())]),
        };
        ScoredPoint {
            id: Some(PointId::from(id)),
            payload: to_payload(&entry).unwrap().into(),
            score,
            ..Default::default()
        }
    }

    fn result(id: u64, score: f32) -> SearchResult {
        SearchResult { id, text: String::new(), metadata: HashMap::new(), score }
    }

    #[test]
    fn decodes_text_and_metadata() {
        let decoded = to_search_result(scored(7, 0.5, "The sky is blue.")).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.text, "The sky is blue.");
        assert_eq!(decoded.score, 0.5);
        assert_eq!(decoded.source(), Some("data.txt"));
    }

    #[test]
    fn skips_points_without_numeric_ids() {
        let mut point = scored(1, 0.5, "text");
        point.id = Some(PointId::from("0b5f1b4e-0000-4000-8000-000000000000".to_string()));
        assert!(to_search_result(point).is_none());

        let mut point = scored(1, 0.5, "text");
        point.id = None;
        assert!(to_search_result(point).is_none());
    }

    #[test]
    fn decoded_points_rank_ties_by_id() {
        let points = [scored(9, 0.8, "a"), scored(3, 0.8, "b"), scored(5, 0.9, "c")];
        let mut results: Vec<SearchResult> =
            points.into_iter().filter_map(to_search_result).collect();
        results.sort_by(rank_order);
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn widens_only_when_the_kth_score_reaches_the_page_end() {
        // k = 2, limit = 3: the third point ties the second.
        assert!(tie_continues_past_page(&[result(0, 0.9), result(1, 0.5), result(2, 0.5)], 2, 3));
        // The third point scores lower, so nothing tied can lie beyond it.
        assert!(!tie_continues_past_page(&[result(0, 0.9), result(1, 0.5), result(2, 0.4)], 2, 3));
        // A short page is the whole collection.
        assert!(!tie_continues_past_page(&[result(0, 0.5), result(1, 0.5)], 2, 3));
        // Ties above the k-th position do not matter.
        assert!(!tie_continues_past_page(&[result(0, 0.9), result(1, 0.9), result(2, 0.4)], 2, 3));
    }

    #[test]
    fn later_generations_use_their_own_collection() {
        let index = QdrantVectorIndex::new("http://localhost:6334", "docqa").unwrap();
        assert_eq!(index.for_generation(0).collection(), "docqa");
        assert_eq!(index.for_generation(2).collection(), "docqa-2");
    }
}
