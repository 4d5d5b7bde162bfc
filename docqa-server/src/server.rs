use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use docqa_rag::{PipelineStatus, RagError, RagPipeline};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 3000 }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub ans: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub indexed_entries: Option<usize>,
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ask", post(ask))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind `config` and serve until Ctrl-C.
pub async fn run_server(config: ServerConfig, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid host/port {}:{}", config.host, config.port))?;

    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!("docqa-server listening on http://{}", addr);
    serve(listener, pipeline, shutdown_signal()).await
}

/// Serve on `listener` while the index builds in the background.
///
/// When `shutdown` completes the server stops accepting connections, drains
/// in-flight requests, and an unfinished build is cancelled.
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<RagPipeline>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let builder = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            // A dropped sender counts as a stop request too.
            let stopped = async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            };
            match pipeline.build_until(stopped).await {
                Ok(()) => info!("index build finished, accepting questions"),
                Err(RagError::Cancelled) => warn!("index build cancelled"),
                Err(e) => error!(error = %e, "index build failed, questions will be refused"),
            }
        }
    });

    let app = app_router(AppState::new(pipeline));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        })
        .await;

    if let Err(e) = builder.await {
        error!(error = %e, "index build task panicked");
    }
    served.context("server error")?;
    info!("docqa-server stopped");
    Ok(())
}

/// Completes on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection, "rejected /ask body");
            AskRequest::default()
        }
    };
    let question = request
        .question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or(ApiError::MissingQuestion)?;

    let ans = state.pipeline.answer(&question).await?;
    Ok(Json(AskResponse { ans }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.pipeline.status();
    let indexed_entries = match state.pipeline.indexed_entries().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "failed to count index entries");
            None
        }
    };

    let label = match status {
        PipelineStatus::Ready => "ready",
        PipelineStatus::Building => "building",
        PipelineStatus::Uninitialized => "uninitialized",
    };
    // A rebuild keeps serving from the previous index.
    let code = if indexed_entries.is_some() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(HealthResponse { status: label.to_string(), indexed_entries }))
}
