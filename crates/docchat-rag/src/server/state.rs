//! Application state for the document chat server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{BackendProvider, LlmBackend, RagConfig};
use crate::error::Result;
use crate::ingestion::{DocumentLoader, IngestPipeline};
use crate::providers::{
    EmbeddingProvider, GeminiClient, IndexRegistry, LazyEmbedder, LlmProvider, LocalVectorIndex,
    OllamaLlm, PineconeIndex, VectorIndexBackend,
};
use crate::retrieval::QueryEngine;

use super::conversations::ConversationLog;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: RagConfig,
    /// Shared embedding model
    embedding_provider: Arc<dyn EmbeddingProvider>,
    /// Vector index backend (local directory or Pinecone)
    vector_index: Arc<dyn VectorIndexBackend>,
    /// LLM provider (Gemini or Ollama)
    llm_provider: Arc<dyn LlmProvider>,
    /// Load, chunk, embed, upsert
    pipeline: IngestPipeline,
    /// Retrieval + generation
    engine: QueryEngine,
    /// Chat messages per conversation
    conversations: Arc<ConversationLog>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state
    ///
    /// The embedding model is not loaded here; the first ingestion or query
    /// initializes it.
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!(
            "Initializing application state (backend: {:?}, llm: {:?})...",
            config.backend,
            config.llm.provider
        );

        let embedding_provider: Arc<dyn EmbeddingProvider> =
            Arc::new(LazyEmbedder::from_config(&config.embeddings));
        tracing::info!(
            "Embedding model {} registered ({} dimensions, loaded on first use)",
            config.embeddings.model,
            config.embeddings.dimensions
        );

        let vector_index: Arc<dyn VectorIndexBackend> = match config.backend {
            BackendProvider::Local => {
                tracing::info!(
                    "Using local vector index at {}",
                    config.vector_db.storage_path.display()
                );
                Arc::new(LocalVectorIndex::new(config.vector_db.storage_path.clone())?)
            }
            BackendProvider::Pinecone => {
                tracing::info!("Using Pinecone vector index ({})", config.pinecone.control_url);
                Arc::new(PineconeIndex::new(
                    &config.pinecone,
                    config.embeddings.dimensions,
                    Arc::new(IndexRegistry::new()),
                )?)
            }
        };

        let llm_provider: Arc<dyn LlmProvider> = match config.llm.provider {
            LlmBackend::Gemini => Arc::new(GeminiClient::new(&config.llm)?),
            LlmBackend::Ollama => Arc::new(OllamaLlm::new(&config.llm)?),
        };
        tracing::info!(
            "LLM provider {} initialized (model: {})",
            llm_provider.name(),
            llm_provider.model()
        );

        Self::from_parts(config, embedding_provider, vector_index, llm_provider)
    }

    /// Assemble state from already-built providers
    pub fn from_parts(
        config: RagConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_index: Arc<dyn VectorIndexBackend>,
        llm_provider: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let loader = DocumentLoader::new(&config.chunking)?;
        let pipeline = IngestPipeline::new(
            loader,
            Arc::clone(&embedding_provider),
            Arc::clone(&vector_index),
            config.embeddings.batch_size,
        );
        let engine = QueryEngine::new(
            Arc::clone(&embedding_provider),
            Arc::clone(&vector_index),
            Arc::clone(&llm_provider),
            config.retrieval.clone(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                embedding_provider,
                vector_index,
                llm_provider,
                pipeline,
                engine,
                conversations: Arc::new(ConversationLog::new()),
                ready: RwLock::new(true),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Get embedding provider
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedding_provider
    }

    /// Get vector index backend
    pub fn vector_index(&self) -> &Arc<dyn VectorIndexBackend> {
        &self.inner.vector_index
    }

    /// Get LLM provider
    pub fn llm_provider(&self) -> &Arc<dyn LlmProvider> {
        &self.inner.llm_provider
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.inner.pipeline
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.inner.engine
    }

    pub fn conversations(&self) -> &Arc<ConversationLog> {
        &self.inner.conversations
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
