//! Document loaders: where the corpus comes from.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::document::Document;
use crate::error::{RagError, Result};

/// Loads the corpus as an ordered list of documents.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document of the corpus.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Ingest`] if the corpus cannot be read.
    async fn load_corpus(&self) -> Result<Vec<Document>>;
}

/// Reads flat UTF-8 text files, one [`Document`] per file.
///
/// The document id and its `source` metadata are the file path as given.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::TextFileLoader;
///
/// let loader = TextFileLoader::new("./data.txt");
/// let documents = loader.load_corpus().await?;
/// ```
#[derive(Debug, Clone)]
pub struct TextFileLoader {
    paths: Vec<PathBuf>,
}

impl TextFileLoader {
    /// Load a single file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { paths: vec![path.into()] }
    }

    /// Load several files, in the given order.
    pub fn with_paths(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { paths: paths.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl DocumentLoader for TextFileLoader {
    async fn load_corpus(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                error!(path = %path.display(), error = %e, "failed to read corpus file");
                RagError::Ingest(format!("failed to read '{}': {e}", path.display()))
            })?;
            debug!(path = %path.display(), bytes = text.len(), "loaded corpus file");
            documents.push(Document::new(path.display().to_string(), text));
        }
        Ok(documents)
    }
}

/// Serves a fixed set of documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    documents: Vec<Document>,
}

impl InMemoryLoader {
    /// Create a loader over `documents`.
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentLoader for InMemoryLoader {
    async fn load_corpus(&self) -> Result<Vec<Document>> {
        Ok(self.documents.clone())
    }
}
