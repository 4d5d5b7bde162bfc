//! Server settings read from the environment.

use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{Context, bail};
use docqa_rag::{
    EmbeddingProvider, Generator, RagConfig, RagPipeline, TextFileLoader, VectorIndex,
    gemini::{GeminiEmbeddingProvider, GeminiGenerator},
    openai::{OpenAIEmbeddingProvider, OpenAIGenerator},
    qdrant::QdrantVectorIndex,
};
use tracing::info;

use crate::server::ServerConfig;

/// Which hosted models answer the questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Gemini,
    OpenAI,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            other => bail!("unknown provider '{other}' (expected 'gemini' or 'openai')"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub data_path: PathBuf,
    pub provider: Provider,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub embedding_model: Option<String>,
    pub generation_model: Option<String>,
    pub qdrant_url: Option<String>,
    pub collection: String,
    pub rag: RagConfig,
}

impl ServerSettings {
    /// Read settings from the process environment. Call `dotenvy::dotenv()` first
    /// to pick up a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PORT") {
            Some(port) => port.parse::<u16>().with_context(|| format!("invalid PORT '{port}'"))?,
            None => 3000,
        };
        let provider = match var("DOCQA_PROVIDER") {
            Some(provider) => provider.parse()?,
            None => Provider::default(),
        };
        let rag = RagConfig::from_lookup(&lookup).context("invalid pipeline configuration")?;

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            data_path: var("DOCQA_DATA_PATH").unwrap_or_else(|| "./data.txt".to_string()).into(),
            provider,
            gemini_api_key: var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            embedding_model: var("DOCQA_EMBEDDING_MODEL"),
            generation_model: var("DOCQA_GENERATION_MODEL"),
            qdrant_url: var("QDRANT_URL"),
            collection: var("DOCQA_COLLECTION").unwrap_or_else(|| "docqa".to_string()),
            rag,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig { host: self.host.clone(), port: self.port }
    }

    /// Wire the providers, loader and index these settings select into an
    /// unbuilt pipeline.
    pub fn build_pipeline(&self) -> anyhow::Result<RagPipeline> {
        let (embedder, generator) = self.providers()?;

        let mut builder = RagPipeline::builder()
            .config(self.rag.clone())
            .loader(Arc::new(TextFileLoader::new(&self.data_path)))
            .embedding_provider(embedder)
            .generator(generator);

        if let Some(url) = &self.qdrant_url {
            let base = QdrantVectorIndex::new(url, self.collection.clone())?;
            info!(url = %url, collection = %self.collection, "using qdrant vector index");
            builder = builder.index_factory(move |generation| -> Arc<dyn VectorIndex> {
                Arc::new(base.for_generation(generation))
            });
        }

        Ok(builder.build()?)
    }

    fn providers(&self) -> anyhow::Result<(Arc<dyn EmbeddingProvider>, Arc<dyn Generator>)> {
        match self.provider {
            Provider::Gemini => {
                let key = self
                    .gemini_api_key
                    .clone()
                    .context("GEMINI_API_KEY or GOOGLE_API_KEY must be set for the gemini provider")?;
                let mut embedder = GeminiEmbeddingProvider::new(&key)?;
                let mut generator = GeminiGenerator::new(&key)?;
                if let Some(model) = &self.embedding_model {
                    embedder = embedder.with_model(model);
                }
                if let Some(model) = &self.generation_model {
                    generator = generator.with_model(model);
                }
                Ok((Arc::new(embedder), Arc::new(generator)))
            }
            Provider::OpenAI => {
                let key = self
                    .openai_api_key
                    .clone()
                    .context("OPENAI_API_KEY must be set for the openai provider")?;
                let mut embedder = OpenAIEmbeddingProvider::new(key.clone())?;
                let mut generator = OpenAIGenerator::new(key)?;
                if let Some(url) = &self.openai_base_url {
                    embedder = embedder.with_base_url(url);
                    generator = generator.with_base_url(url);
                }
                if let Some(model) = &self.embedding_model {
                    embedder = embedder.with_model(model);
                }
                if let Some(model) = &self.generation_model {
                    generator = generator.with_model(model);
                }
                Ok((Arc::new(embedder), Arc::new(generator)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use docqa_rag::{ContextPolicy, PipelineStatus};

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<ServerSettings> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerSettings::from_lookup(|key: &str| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.data_path, PathBuf::from("./data.txt"));
        assert_eq!(settings.provider, Provider::Gemini);
        assert_eq!(settings.collection, "docqa");
        assert!(settings.qdrant_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let settings = settings(&[
            ("PORT", "8080"),
            ("DOCQA_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("DOCQA_CONTEXT_POLICY", "strict"),
            ("DOCQA_DATA_PATH", "/srv/corpus.txt"),
        ])
        .unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.provider, Provider::OpenAI);
        assert_eq!(settings.rag.context_policy, ContextPolicy::Strict);
        assert_eq!(settings.data_path, PathBuf::from("/srv/corpus.txt"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(settings(&[("PORT", "eighty")]).is_err());
        assert!(settings(&[("DOCQA_PROVIDER", "llama")]).is_err());
        assert!(settings(&[("DOCQA_TOP_K", "0")]).is_err());
    }

    #[test]
    fn builds_an_unbuilt_pipeline_for_openai() {
        let settings = settings(&[("DOCQA_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        let pipeline = settings.build_pipeline().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Uninitialized);
    }

    #[tokio::test]
    async fn qdrant_settings_build_an_unbuilt_pipeline() {
        let settings = settings(&[
            ("DOCQA_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("QDRANT_URL", "http://localhost:6334"),
            ("DOCQA_COLLECTION", "handbook"),
        ])
        .unwrap();
        assert_eq!(settings.collection, "handbook");
        let pipeline = settings.build_pipeline().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Uninitialized);
    }

    #[test]
    fn openai_requires_a_key() {
        let settings = settings(&[("DOCQA_PROVIDER", "openai")]).unwrap();
        assert!(settings.build_pipeline().is_err());
    }
}
