use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docqa_rag::{ErrorKind, RagError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub const MISSING_QUESTION: &str = "please provide the question";
pub const NO_ANSWER: &str = "no answer available";
pub const NOT_READY: &str = "the index is not ready yet, please retry shortly";
pub const PROCESSING_FAILED: &str = "sorry, the question could not be processed";

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub msg: String,
}

/// Failures of a request, mapped to status codes without exposing internals.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("question missing or blank")]
    MissingQuestion,
    #[error(transparent)]
    Rag(#[from] RagError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingQuestion => StatusCode::BAD_REQUEST,
            // A build that failed for good will not become ready by retrying.
            Self::Rag(RagError::PipelineNotReady { cause: Some(_) }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Rag(e) => match e.kind() {
                ErrorKind::PipelineNotReady => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::EmptyContext => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn public_message(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => MISSING_QUESTION,
            StatusCode::SERVICE_UNAVAILABLE => NOT_READY,
            StatusCode::NOT_FOUND => NO_ANSWER,
            _ => PROCESSING_FAILED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if let Self::Rag(e) = &self {
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    warn!(error = %e, "question received before the index is ready");
                } else {
                    error!(error = %e, kind = ?e.kind(), "question failed");
                }
            }
        }
        let body = ErrorBody { msg: self.public_message().to_string() };
        (status, Json(body)).into_response()
    }
}
