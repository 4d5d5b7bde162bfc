use std::sync::Arc;

use docqa_server::{ServerSettings, run_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ServerSettings::from_env()?;
    info!(
        provider = ?settings.provider,
        data_path = %settings.data_path.display(),
        chunk_size = settings.rag.chunk_size,
        top_k = settings.rag.top_k,
        "starting docqa-server"
    );

    let pipeline = Arc::new(settings.build_pipeline()?);
    run_server(settings.server_config(), pipeline).await
}
