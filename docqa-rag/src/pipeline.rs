//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] owns the index lifecycle: it builds the index once
//! (load → chunk → embed → add), then answers any number of concurrent
//! questions against it (embed → search → synthesize).
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagPipeline, RagConfig, TextFileLoader};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .loader(Arc::new(TextFileLoader::new("./data.txt")))
//!     .embedding_provider(Arc::new(my_embedder))
//!     .generator(Arc::new(my_model))
//!     .build()?;
//!
//! pipeline.build().await?;
//! let answer = pipeline.answer("What color is the sky?").await?;
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::chunking::{Chunker, chunker_for};
use crate::config::RagConfig;
use crate::document::{Chunk, Document, IndexEntry};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::inmemory::InMemoryVectorIndex;
use crate::loader::DocumentLoader;
use crate::retriever::Retriever;
use crate::synthesizer::{Answer, AnswerSynthesizer, Generator};
use crate::vectorstore::VectorIndex;

/// Creates the index a build writes into.
///
/// The argument is the build generation: `0` for the first build attempt,
/// incremented on every later attempt. A rebuild must receive an empty index
/// distinct from the committed one, so factories backed by a persistent store
/// use the generation to pick a fresh target.
pub type IndexFactory = Arc<dyn Fn(u64) -> Arc<dyn VectorIndex> + Send + Sync>;

/// Lifecycle phase of a [`RagPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// No index has been committed yet.
    Uninitialized,
    /// A build or rebuild is running.
    Building,
    /// An index is committed and questions can be answered.
    Ready,
}

#[derive(Default)]
struct State {
    building: bool,
    committed: Option<Arc<dyn VectorIndex>>,
    last_error: Option<String>,
    next_generation: u64,
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`], share it behind an `Arc`,
/// call [`build`](RagPipeline::build) once, then
/// [`answer`](RagPipeline::answer) from any number of tasks.
///
/// The committed index is swapped in as a single reference once a build has
/// fully succeeded; readers never observe a half-built index. A failed or
/// cancelled build leaves the previous state untouched.
pub struct RagPipeline {
    config: RagConfig,
    loader: Arc<dyn DocumentLoader>,
    chunker: Arc<dyn Chunker>,
    embedder: Embedder,
    synthesizer: AnswerSynthesizer,
    index_factory: IndexFactory,
    state: RwLock<State>,
}

/// Resets the `building` flag when a build ends, including when its future is dropped.
struct BuildGuard<'a> {
    state: &'a RwLock<State>,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).building = false;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    Initial,
    Rebuild,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return the current lifecycle phase.
    pub fn status(&self) -> PipelineStatus {
        let state = self.read_state();
        if state.building {
            PipelineStatus::Building
        } else if state.committed.is_some() {
            PipelineStatus::Ready
        } else {
            PipelineStatus::Uninitialized
        }
    }

    /// Number of entries in the committed index, or `None` before the first build.
    pub async fn indexed_entries(&self) -> Result<Option<usize>> {
        let index = self.read_state().committed.clone();
        match index {
            Some(index) => index.len().await.map(Some),
            None => Ok(None),
        }
    }

    /// Build the index: `Uninitialized → Building → Ready`.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is already built or building, or if loading,
    /// embedding (after retries) or indexing fails. On failure nothing is
    /// committed and the pipeline stays `Uninitialized`.
    pub async fn build(&self) -> Result<()> {
        self.run_build(BuildMode::Initial).await
    }

    /// Replace the index with a freshly built one: `Ready → Building → Ready`.
    ///
    /// Questions keep being answered from the previous index until the new one
    /// is committed. If the rebuild fails, the previous index stays in place.
    ///
    /// # Errors
    ///
    /// Besides the failures of [`build`](Self::build), returns
    /// [`RagError::Config`] if the index factory hands back the committed index
    /// or one that already holds entries.
    pub async fn rebuild(&self) -> Result<()> {
        self.run_build(BuildMode::Rebuild).await
    }

    /// Like [`build`](Self::build), but gives up with [`RagError::Cancelled`]
    /// as soon as `shutdown` completes.
    pub async fn build_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::select! {
            result = self.build() => result,
            () = shutdown => {
                warn!("index build cancelled by shutdown");
                Err(RagError::Cancelled)
            }
        }
    }

    /// Like [`rebuild`](Self::rebuild), but gives up with [`RagError::Cancelled`]
    /// as soon as `shutdown` completes.
    pub async fn rebuild_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::select! {
            result = self.rebuild() => result,
            () = shutdown => {
                warn!("index rebuild cancelled by shutdown");
                Err(RagError::Cancelled)
            }
        }
    }

    async fn run_build(&self, mode: BuildMode) -> Result<()> {
        let (_guard, generation) = self.begin_build(mode)?;
        let started = Instant::now();
        info!(rebuild = mode == BuildMode::Rebuild, generation, "building index");

        match self.build_index(mode, generation).await {
            Ok((index, entry_count)) => {
                let mut state = self.write_state();
                state.committed = Some(index);
                state.last_error = None;
                info!(entry_count, elapsed_ms = started.elapsed().as_millis(), "index ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "index build failed");
                self.write_state().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn begin_build(&self, mode: BuildMode) -> Result<(BuildGuard<'_>, u64)> {
        let mut state = self.write_state();
        if state.building {
            return Err(RagError::Config("an index build is already in progress".to_string()));
        }
        if mode == BuildMode::Initial && state.committed.is_some() {
            return Err(RagError::Config(
                "the index is already built; call rebuild() to replace it".to_string(),
            ));
        }
        state.building = true;
        let generation = state.next_generation;
        state.next_generation += 1;
        Ok((BuildGuard { state: &self.state }, generation))
    }

    async fn build_index(
        &self,
        mode: BuildMode,
        generation: u64,
    ) -> Result<(Arc<dyn VectorIndex>, usize)> {
        let index = (self.index_factory)(generation);
        let existing = index.len().await?;

        if mode == BuildMode::Rebuild {
            let committed = self.read_state().committed.clone();
            if committed.is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(&c), Arc::as_ptr(&index))) {
                return Err(RagError::Config(format!(
                    "rebuild needs a fresh index but the factory returned the committed {} index",
                    index.name()
                )));
            }
            if existing > 0 {
                return Err(RagError::Config(format!(
                    "rebuild needs an empty index but the {} index for generation {generation} \
                     already holds {existing} entries",
                    index.name()
                )));
            }
        } else if existing > 0 {
            // A persistent store that outlived a previous process.
            info!(index = index.name(), existing, "reusing populated index");
            return Ok((index, existing));
        }

        let documents = self.loader.load_corpus().await?;
        let chunks = self.chunk_documents(&documents);
        info!(document_count = documents.len(), chunk_count = chunks.len(), "corpus chunked");
        drop(documents);

        let entries = self.embed_chunks(chunks).await?;
        let entry_count = entries.len();
        if entry_count == 0 {
            warn!("corpus produced no chunks; the index is empty");
        }
        index.add(entries).await?;
        Ok((index, entry_count))
    }

    /// Append documents to the committed index.
    ///
    /// Only indexes that report [`VectorIndex::supports_incremental`] accept
    /// this; the in-memory index is replaced with [`rebuild`](Self::rebuild)
    /// instead. Returns the ids assigned to the new entries.
    pub async fn ingest(&self, documents: &[Document]) -> Result<Vec<u64>> {
        let index = self.ready_index()?;
        if !index.supports_incremental() {
            return Err(RagError::Config(format!(
                "the {} index does not accept incremental ingest; use rebuild()",
                index.name()
            )));
        }

        let chunks = self.chunk_documents(documents);
        let entries = self.embed_chunks(chunks).await?;
        let ids = index.add(entries).await?;
        info!(document_count = documents.len(), entry_count = ids.len(), "ingested documents");
        Ok(ids)
    }

    /// Answer a question from the committed index.
    ///
    /// # Errors
    ///
    /// [`RagError::PipelineNotReady`] before a successful build; otherwise
    /// the embedding, search, [`RagError::EmptyContext`] or generation error
    /// of this question alone.
    pub async fn answer(&self, question: &str) -> Result<String> {
        self.answer_with_sources(question).await.map(|answer| answer.text)
    }

    /// Answer a question and report the passages it was grounded on.
    pub async fn answer_with_sources(&self, question: &str) -> Result<Answer> {
        let index = self.ready_index()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Config("question must not be empty".to_string()));
        }

        let retriever =
            Retriever::new(self.embedder.clone(), index, self.config.similarity_threshold);
        let passages = retriever.retrieve(question, self.config.top_k).await?;
        let answer = self.synthesizer.synthesize(question, &passages).await?;

        info!(source_count = answer.sources.len(), "question answered");
        Ok(answer)
    }

    fn ready_index(&self) -> Result<Arc<dyn VectorIndex>> {
        let state = self.read_state();
        state
            .committed
            .clone()
            .ok_or_else(|| RagError::PipelineNotReady { cause: state.last_error.clone() })
    }

    fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|doc| self.chunker.chunk(doc)).collect()
    }

    /// Batches are cut here rather than left to the embedder so a retry repeats
    /// only the failed batch. Each batch reaches the provider as a single call.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexEntry>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            vectors.extend(self.embed_with_retry(&texts).await?);
        }
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect())
    }

    /// Embed one batch, retrying service failures with exponential backoff.
    async fn embed_with_retry(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let retry = &self.config.ingest_retry;
        let mut attempt = 1;
        loop {
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let backoff = retry.backoff_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "embedding failed during build, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `loader`, `embedding_provider` and `generator` are required. Without an
/// explicit chunker one is derived from the config's chunk settings; without
/// an index factory every build writes into a new [`InMemoryVectorIndex`].
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    loader: Option<Arc<dyn DocumentLoader>>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn Generator>>,
    index_factory: Option<IndexFactory>,
    instructions: Option<String>,
    template: Option<String>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the corpus loader.
    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generation model.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the factory producing the index each build writes into.
    ///
    /// See [`IndexFactory`] for the meaning of the generation argument.
    pub fn index_factory(
        mut self,
        factory: impl Fn(u64) -> Arc<dyn VectorIndex> + Send + Sync + 'static,
    ) -> Self {
        self.index_factory = Some(Arc::new(factory));
        self
    }

    /// Override the synthesizer's system instructions.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Override the synthesizer's prompt template.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Build the [`RagPipeline`] in state `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required field is missing or a
    /// setting is invalid.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let loader =
            self.loader.ok_or_else(|| RagError::Config("loader is required".to_string()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let generator =
            self.generator.ok_or_else(|| RagError::Config("generator is required".to_string()))?;

        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::from(chunker_for(&config)?),
        };
        let index_factory: IndexFactory = match self.index_factory {
            Some(factory) => factory,
            None => Arc::new(|_| -> Arc<dyn VectorIndex> { Arc::new(InMemoryVectorIndex::new()) }),
        };

        let embedder =
            Embedder::new(embedding_provider, config.embed_batch_size, config.request_timeout);
        let mut synthesizer =
            AnswerSynthesizer::new(generator, config.context_policy, config.request_timeout);
        if let Some(instructions) = self.instructions {
            synthesizer = synthesizer.with_instructions(instructions);
        }
        if let Some(template) = self.template {
            synthesizer = synthesizer.with_template(template)?;
        }

        Ok(RagPipeline {
            config,
            loader,
            chunker,
            embedder,
            synthesizer,
            index_factory,
            state: RwLock::new(State::default()),
        })
    }
}
