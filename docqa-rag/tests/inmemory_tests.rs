//! Tests for in-memory vector index ids, dimensions and search ordering.

use std::collections::HashMap;

use docqa_rag::{InMemoryVectorIndex, IndexEntry, RagError, VectorIndex, cosine_similarity};
use proptest::prelude::*;

fn entry(text: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry { vector, text: text.to_string(), metadata: HashMap::new() }
}

#[tokio::test]
async fn ids_are_sequential_across_adds() {
    let index = InMemoryVectorIndex::new();
    let first = index.add(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])]).await.unwrap();
    let second = index.add(vec![entry("c", vec![1.0, 1.0])]).await.unwrap();

    assert_eq!(first, vec![0, 1]);
    assert_eq!(second, vec![2]);
    assert_eq!(index.len().await.unwrap(), 3);
    assert_eq!(index.dimensions().await, Some(2));
}

#[tokio::test]
async fn search_ranks_by_cosine_similarity() {
    let index = InMemoryVectorIndex::new();
    index
        .add(vec![
            entry("east", vec![1.0, 0.0]),
            entry("north", vec![0.0, 1.0]),
            entry("north-east", vec![1.0, 1.0]),
        ])
        .await
        .unwrap();

    let results = index.search(&[0.0, 2.0], 3).await.unwrap();
    let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["north", "north-east", "east"]);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    assert_eq!(results[2].score, 0.0);
}

#[tokio::test]
async fn ties_are_broken_by_ascending_id() {
    let index = InMemoryVectorIndex::new();
    index
        .add(vec![
            entry("first", vec![1.0, 0.0]),
            entry("other", vec![0.0, 1.0]),
            entry("second", vec![2.0, 0.0]),
        ])
        .await
        .unwrap();

    let results = index.search(&[1.0, 0.0], 2).await.unwrap();
    assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 2]);
}

#[tokio::test]
async fn empty_index_and_zero_k_return_nothing() {
    let index = InMemoryVectorIndex::new();
    assert!(index.search(&[1.0, 0.0], 5).await.unwrap().is_empty());

    index.add(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();
    assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
    assert_eq!(index.search(&[1.0, 0.0], 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn mismatched_dimensions_are_rejected_atomically() {
    let index = InMemoryVectorIndex::new();
    index.add(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();

    let err = index
        .add(vec![entry("b", vec![0.0, 1.0]), entry("c", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
    assert_eq!(index.len().await.unwrap(), 1);

    let err = index.search(&[1.0], 1).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
}

#[tokio::test]
async fn zero_length_vectors_are_rejected() {
    let index = InMemoryVectorIndex::new();
    assert!(matches!(
        index.add(vec![entry("a", Vec::new())]).await,
        Err(RagError::VectorStore { .. })
    ));
    assert_eq!(index.dimensions().await, None);
}

#[test]
fn cosine_similarity_of_zero_vector_is_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
}

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

fn arb_entry(dim: usize) -> impl Strategy<Value = IndexEntry> {
    ("[a-z ]{5,30}", arb_normalized_embedding(dim))
        .prop_map(|(text, vector)| IndexEntry { vector, text, metadata: HashMap::new() })
}

mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Results are ordered by descending score, ties by ascending id, and
        /// bounded by both `k` and the number of stored entries.
        #[test]
        fn results_ordered_and_bounded_by_k(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let count = entries.len();
            let (results, again) = rt.block_on(async {
                let index = InMemoryVectorIndex::new();
                index.add(entries).await.unwrap();
                let results = index.search(&query, k).await.unwrap();
                let again = index.search(&query, k).await.unwrap();
                (results, again)
            });

            prop_assert_eq!(results.len(), k.min(count));
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score > window[1].score
                        || (window[0].score == window[1].score && window[0].id < window[1].id),
                    "results out of order: ({}, {}) before ({}, {})",
                    window[0].id,
                    window[0].score,
                    window[1].id,
                    window[1].score,
                );
            }
            prop_assert_eq!(results, again);
        }
    }
}
