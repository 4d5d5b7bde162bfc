//! Data types for documents, chunks, index entries and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the source identifier of a document.
pub const SOURCE_KEY: &str = "source";

/// Metadata key holding a chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Source identifier, e.g. the file path the text was read from.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document whose metadata records `id` as its source.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let metadata = HashMap::from([(SOURCE_KEY.to_string(), id.clone())]);
        Self { id, text: text.into(), metadata }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A contiguous segment of a [`Document`].
///
/// `start` and `end` are character (not byte) offsets into the parent text;
/// `text` is exactly the characters in `start..end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Position of the chunk within its document, starting at zero.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
    /// The [`Document::id`] this chunk was cut from.
    pub document_id: String,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Number of characters in the chunk.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// A vector and its payload, ready to be added to a [`VectorIndex`](crate::VectorIndex).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The embedding of `text`.
    pub vector: Vec<f32>,
    /// The chunk text, kept for display and prompting.
    pub text: String,
    /// Chunk metadata (source, chunk index, offsets).
    pub metadata: HashMap<String, String>,
}

impl IndexEntry {
    /// Pair a chunk with its embedding. Offsets are recorded in the metadata.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        let mut metadata = chunk.metadata;
        metadata.insert("start".to_string(), chunk.start.to_string());
        metadata.insert("end".to_string(), chunk.end.to_string());
        Self { vector, text: chunk.text, metadata }
    }
}

/// A retrieved entry paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The id assigned to the entry when it was added.
    pub id: u64,
    /// The stored chunk text.
    pub text: String,
    /// The stored chunk metadata.
    pub metadata: HashMap<String, String>,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

impl SearchResult {
    /// The source identifier recorded for this entry, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}
