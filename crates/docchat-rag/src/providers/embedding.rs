//! Embedding provider trait and the process-wide lazily initialized instance

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{Error, Result};

use super::hashing::HashEmbedder;
use super::ollama::OllamaEmbedder;
use super::onnx::OnnxEmbedder;

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OnnxEmbedder`: local sentence-transformer (all-MiniLM-L6-v2)
/// - `OllamaEmbedder`: local Ollama server
/// - `HashEmbedder`: feature hashing, no model
///
/// Embedding the same text with the same model must always produce the same
/// vector, and every vector has `dimensions()` entries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    ///
    /// Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

type Initializer =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn EmbeddingProvider>>> + Send + Sync>;

/// Shared embedder whose model is built on first use
///
/// Construct one per process and hand clones of the `Arc` to every consumer.
/// Concurrent first calls wait on a single initialization; a failed
/// initialization is not remembered, so the next call tries again.
pub struct LazyEmbedder {
    dimensions: usize,
    label: String,
    init: Initializer,
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
}

impl LazyEmbedder {
    /// Wrap an arbitrary initializer
    pub fn new<F, Fut>(dimensions: usize, label: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn EmbeddingProvider>>> + Send + 'static,
    {
        Self {
            dimensions,
            label: label.into(),
            init: Box::new(move || Box::pin(init())),
            cell: OnceCell::new(),
        }
    }

    /// Build the configured embedding backend on first use
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let config = config.clone();
        let label = match config.provider {
            EmbeddingBackend::Onnx => "onnx",
            EmbeddingBackend::Ollama => "ollama",
            EmbeddingBackend::Hashing => "hashing",
        };
        Self::new(config.dimensions, label, move || {
            let config = config.clone();
            async move { build_embedder(&config).await }
        })
    }

    /// Resolve the shared instance, initializing it if needed
    pub async fn get(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.cell
            .get_or_try_init(|| async {
                tracing::info!("Initializing {} embedding model", self.label);
                let provider = (self.init)().await.map_err(|e| {
                    tracing::error!("Embedding model initialization failed: {}", e);
                    e
                })?;
                if provider.dimensions() != self.dimensions {
                    return Err(Error::embedding(format!(
                        "{} produces {} dimensions, configured {}",
                        provider.name(),
                        provider.dimensions(),
                        self.dimensions
                    )));
                }
                Ok(provider)
            })
            .await
    }

    /// Whether the model has been loaded
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl EmbeddingProvider for LazyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.get().await?.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.get().await?.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        match self.get().await {
            Ok(provider) => provider.health_check().await,
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Construct the embedder selected in configuration
pub async fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Onnx => Arc::new(OnnxEmbedder::new(config).await?),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(config)?),
        EmbeddingBackend::Hashing => Arc::new(HashEmbedder::new(config.dimensions)),
    };
    Ok(provider)
}
