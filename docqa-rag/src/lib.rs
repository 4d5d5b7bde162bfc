//! # docqa-rag
//!
//! Retrieval pipeline for answering questions from a private text corpus.
//!
//! At build time the corpus is loaded, split into overlapping chunks,
//! embedded, and added to a vector index. At query time the question is
//! embedded, the most similar chunks are retrieved, and a language model is
//! asked to answer using only those chunks.
//!
//! ## Features
//!
//! - `gemini` — [`GeminiEmbeddingProvider`](gemini::GeminiEmbeddingProvider) and
//!   [`GeminiGenerator`](gemini::GeminiGenerator)
//! - `openai` — [`OpenAIEmbeddingProvider`](openai::OpenAIEmbeddingProvider) and
//!   [`OpenAIGenerator`](openai::OpenAIGenerator)
//! - `qdrant` — [`QdrantVectorIndex`](qdrant::QdrantVectorIndex), a persistent index
//! - `full` — all of the above
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{RagConfig, RagPipeline, TextFileLoader};
//!
//! let pipeline = Arc::new(
//!     RagPipeline::builder()
//!         .config(RagConfig::default())
//!         .loader(Arc::new(TextFileLoader::new("./data.txt")))
//!         .embedding_provider(Arc::new(embedder))
//!         .generator(Arc::new(model))
//!         .build()?,
//! );
//! pipeline.build().await?;
//! let answer = pipeline.answer("What color is the sky?").await?;
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod loader;
pub mod pipeline;
pub mod retriever;
pub mod synthesizer;
pub mod vectorstore;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, chunker_for};
pub use config::{ChunkStrategy, ContextPolicy, RagConfig, RagConfigBuilder, RetryPolicy};
pub use document::{Chunk, Document, IndexEntry, SearchResult};
pub use embedding::{Embedder, EmbeddingProvider};
pub use error::{ErrorKind, RagError, Result};
pub use inmemory::InMemoryVectorIndex;
pub use loader::{DocumentLoader, InMemoryLoader, TextFileLoader};
pub use pipeline::{IndexFactory, PipelineStatus, RagPipeline, RagPipelineBuilder};
pub use retriever::Retriever;
pub use synthesizer::{Answer, AnswerSynthesizer, GenerationRequest, Generator, Source};
pub use vectorstore::{VectorIndex, cosine_similarity};
