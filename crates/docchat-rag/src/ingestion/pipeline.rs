//! Ingestion pipeline orchestration: load, chunk, embed, upsert

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, VectorIndexBackend};
use crate::types::{Credentials, DocumentId, DocumentRef};

use super::loader::DocumentLoader;

/// Turns uploaded documents into per-document vector namespaces
#[derive(Clone)]
pub struct IngestPipeline {
    loader: Arc<DocumentLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndexBackend>,
    batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        loader: DocumentLoader,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndexBackend>,
        batch_size: usize,
    ) -> Self {
        Self {
            loader: Arc::new(loader),
            embedder,
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest one document into the namespace named by its id
    ///
    /// Returns the number of chunks stored. A document without extractable
    /// text stores nothing and returns 0. On failure nothing is rolled back.
    pub async fn ingest(&self, doc: &DocumentRef, credentials: &Credentials) -> Result<usize> {
        tracing::info!("Ingesting document {} ({})", doc.id, doc.source_label);

        let loader = Arc::clone(&self.loader);
        let owned = doc.clone();
        let chunks = tokio::task::spawn_blocking(move || loader.load_and_chunk(&owned))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))??;

        if chunks.is_empty() {
            tracing::warn!("Document {} produced no chunks", doc.id);
            return Ok(0);
        }

        let dimensions = self.embedder.dimensions();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(Error::embedding(format!(
                    "{} returned {} vectors for {} texts",
                    self.embedder.name(),
                    embedded.len(),
                    texts.len()
                )));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dimensions) {
                return Err(Error::DimensionMismatch {
                    expected: dimensions,
                    actual: bad.len(),
                });
            }
            vectors.extend(embedded);
        }

        let namespace = doc.id.namespace();
        self.index
            .upsert(&namespace, &chunks, &vectors, credentials)
            .await?;

        tracing::info!(
            "Document {} stored as {} chunks in namespace {} ({})",
            doc.id,
            chunks.len(),
            namespace,
            self.index.name()
        );
        Ok(chunks.len())
    }

    /// Remove a document's namespace, reporting failures
    pub async fn try_delete_document_vectors(
        &self,
        document_id: DocumentId,
        credentials: &Credentials,
    ) -> Result<()> {
        self.index
            .delete_namespace(&document_id.namespace(), credentials)
            .await
    }

    /// Remove a document's namespace; failures are logged and swallowed
    pub async fn delete_document_vectors(&self, document_id: DocumentId, credentials: &Credentials) {
        if let Err(e) = self.try_delete_document_vectors(document_id, credentials).await {
            tracing::warn!("Failed to delete vectors for document {}: {}", document_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{HashEmbedder, LocalVectorIndex};
    use crate::types::FileType;
    use async_trait::async_trait;
    use std::io::Write;

    struct FailingIndex;

    #[async_trait]
    impl VectorIndexBackend for FailingIndex {
        async fn upsert(
            &self,
            _namespace: &str,
            _chunks: &[crate::types::Chunk],
            _vectors: &[Vec<f32>],
            _credentials: &Credentials,
        ) -> Result<()> {
            Err(Error::unavailable("test", "down"))
        }

        async fn search(
            &self,
            _namespace: &str,
            _query: &[f32],
            _k: usize,
            _credentials: &Credentials,
        ) -> Result<Vec<crate::types::RetrievalResult>> {
            Err(Error::unavailable("test", "down"))
        }

        async fn delete_namespace(&self, _namespace: &str, _credentials: &Credentials) -> Result<()> {
            Err(Error::unavailable("test", "down"))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn pipeline_with(index: Arc<dyn VectorIndexBackend>) -> IngestPipeline {
        IngestPipeline::new(DocumentLoader::default(), Arc::new(HashEmbedder::new(32)), index, 4)
    }

    #[tokio::test]
    async fn test_empty_document_skips_backend() {
        let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        let doc = DocumentRef::new(DocumentId(1), file.path(), FileType::Txt);

        let count = pipeline_with(Arc::new(FailingIndex))
            .ingest(&doc, &Credentials::default())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate_from_ingest() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"Some content worth indexing.").unwrap();
        let doc = DocumentRef::new(DocumentId(2), file.path(), FileType::Txt);

        let result = pipeline_with(Arc::new(FailingIndex))
            .ingest(&doc, &Credentials::default())
            .await;
        assert!(matches!(result, Err(Error::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_best_effort_delete_swallows_errors() {
        let pipeline = pipeline_with(Arc::new(FailingIndex));
        pipeline
            .delete_document_vectors(DocumentId(3), &Credentials::default())
            .await;
        assert!(pipeline
            .try_delete_document_vectors(DocumentId(3), &Credentials::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ingest_batches_all_chunks() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = LocalVectorIndex::new(dir.path()).unwrap();
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all("Paragraph about rivers and lakes.\n\n".repeat(60).as_bytes())
            .unwrap();
        let doc = DocumentRef::new(DocumentId(4), file.path(), FileType::Txt);

        let count = pipeline_with(Arc::new(index.clone()))
            .ingest(&doc, &Credentials::default())
            .await
            .unwrap();
        assert!(count > 4);

        let hits = index
            .search("4", &HashEmbedder::new(32).embed_sync("rivers"), 100, &Credentials::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), count);
    }
}
