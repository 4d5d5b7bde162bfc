//! `docqa-server` answers questions about a text corpus over HTTP.
//! The index is built in the background at startup; `POST /ask` answers
//! once it is ready and `GET /health` reports progress.

pub mod error;
pub mod server;
pub mod settings;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, app_router, run_server, serve, shutdown_signal};
pub use settings::{Provider, ServerSettings};
