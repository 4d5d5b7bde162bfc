//! Error types for the `docqa-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building the index or answering a question.
#[derive(Debug, Error)]
pub enum RagError {
    /// The corpus could not be loaded or chunked.
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// The embedding service failed or returned malformed data.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingService {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding service did not answer within the configured timeout.
    #[error("Embedding request to {provider} timed out after {timeout:?}")]
    EmbeddingTimeout {
        /// The embedding provider that timed out.
        provider: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A vector's length differs from the index's established dimensionality.
    #[error("Dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        /// The dimensionality fixed by the first successful add.
        expected: usize,
        /// The length of the offending vector.
        actual: usize,
    },

    /// The generation model failed or returned no answer.
    #[error("Generation error ({provider}): {message}")]
    GenerationService {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation model did not answer within the configured timeout.
    #[error("Generation request to {provider} timed out after {timeout:?}")]
    GenerationTimeout {
        /// The generation provider that timed out.
        provider: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// No relevant context was retrieved and the strict context policy is on.
    #[error("No relevant context found for the question")]
    EmptyContext,

    /// `answer()` was called before a successful `build()`.
    #[error("Pipeline is not ready{}", cause_suffix(.cause))]
    PipelineNotReady {
        /// The error that made the last build fail, if any.
        cause: Option<String>,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The build was cancelled by a shutdown request.
    #[error("Build cancelled")]
    Cancelled,
}

fn cause_suffix(cause: &Option<String>) -> String {
    cause.as_deref().map(|c| format!(": {c}")).unwrap_or_default()
}

/// The fixed set of failure kinds reported to the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ingest,
    EmbeddingService,
    DimensionMismatch,
    GenerationService,
    EmptyContext,
    PipelineNotReady,
    VectorStore,
    Config,
    Cancelled,
}

impl RagError {
    /// Collapse this error into its reporting kind. Timeouts report as the
    /// service that timed out.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ingest(_) => ErrorKind::Ingest,
            Self::EmbeddingService { .. } | Self::EmbeddingTimeout { .. } => {
                ErrorKind::EmbeddingService
            }
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::GenerationService { .. } | Self::GenerationTimeout { .. } => {
                ErrorKind::GenerationService
            }
            Self::EmptyContext => ErrorKind::EmptyContext,
            Self::PipelineNotReady { .. } => ErrorKind::PipelineNotReady,
            Self::VectorStore { .. } => ErrorKind::VectorStore,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the ingest path may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingService { .. } | Self::EmbeddingTimeout { .. })
    }

    /// Whether this error is a timeout of an external call.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EmbeddingTimeout { .. } | Self::GenerationTimeout { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
