//! Pinecone vector index over REST
//!
//! Index name and API key come with each call. Before the first upsert into
//! an index it is verified against the embedder's dimensionality (created, or
//! deleted and recreated on mismatch) and awaited until ready; the outcome is
//! memoized per (API key, index name) in an [`IndexRegistry`].
//!
//! Searches and deletes never create or recreate an index. They only look it
//! up: a missing index holds no vectors.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::PineconeConfig;
use crate::error::{Error, Result};
use crate::types::{Chunk, Credentials, RetrievalResult, VectorCredentials};

use super::vector_store::{check_upsert_args, VectorIndexBackend};

const SERVICE: &str = "pinecone";

/// Verified data-plane location of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    /// Base URL for vector operations
    pub host: String,
    /// Dimensionality the index was verified at
    pub dimension: usize,
}

type RegistryKey = (String, String);

/// Process-wide memo of verified indexes
///
/// Keys hold a SHA-256 digest of the API key, never the key itself.
#[derive(Default)]
pub struct IndexRegistry {
    entries: DashMap<RegistryKey, Arc<OnceCell<IndexHandle>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(credentials: &VectorCredentials) -> RegistryKey {
        let digest = Sha256::digest(credentials.api_key.as_bytes());
        (hex::encode(digest), credentials.index_name.clone())
    }

    /// Shared cell for an index; concurrent callers receive the same cell
    fn cell(&self, credentials: &VectorCredentials) -> Arc<OnceCell<IndexHandle>> {
        self.entries
            .entry(Self::key(credentials))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Verified handle, if verification already succeeded
    pub fn get(&self, credentials: &VectorCredentials) -> Option<IndexHandle> {
        self.entries
            .get(&Self::key(credentials))
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop a memoized index so the next use verifies again
    pub fn forget(&self, credentials: &VectorCredentials) {
        self.entries.remove(&Self::key(credentials));
    }

    /// Number of verified indexes
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Serialize)]
struct UpsertRecord<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: RecordMetadata<'a>,
}

#[derive(Serialize)]
struct RecordMetadata<'a> {
    text: &'a str,
    source: &'a str,
    document_id: i64,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source: String,
}

/// Managed Pinecone backend
pub struct PineconeIndex {
    client: Client,
    config: PineconeConfig,
    dimensions: usize,
    registry: Arc<IndexRegistry>,
}

impl PineconeIndex {
    /// Create a backend whose indexes are kept at `dimensions`
    pub fn new(
        config: &PineconeConfig,
        dimensions: usize,
        registry: Arc<IndexRegistry>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            dimensions,
            registry,
        })
    }

    /// Registry shared by this backend
    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    fn vector_credentials(credentials: &Credentials) -> Result<&VectorCredentials> {
        match &credentials.vector {
            Some(v) if !v.api_key.is_empty() && !v.index_name.is_empty() => Ok(v),
            _ => Err(Error::Config(
                "Pinecone backend requires a vector API key and index name".to_string(),
            )),
        }
    }

    fn authorized(&self, builder: RequestBuilder, credentials: &VectorCredentials) -> RequestBuilder {
        builder
            .header("Api-Key", &credentials.api_key)
            .header("X-Pinecone-API-Version", &self.config.api_version)
    }

    fn control_url(&self, path: &str) -> String {
        format!("{}{}", self.config.control_url.trim_end_matches('/'), path)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.ready_poll_interval_ms)
    }

    /// Verify the index once and return its data-plane handle
    async fn ensure_index(&self, credentials: &VectorCredentials) -> Result<IndexHandle> {
        let cell = self.registry.cell(credentials);
        let handle = cell.get_or_try_init(|| self.verify(credentials)).await?;
        Ok(handle.clone())
    }

    async fn verify(&self, credentials: &VectorCredentials) -> Result<IndexHandle> {
        let name = &credentials.index_name;

        match self.describe(credentials).await? {
            Some(existing) if existing.dimension == self.dimensions => {
                tracing::debug!("Index {} exists with dimension {}", name, existing.dimension);
            }
            Some(existing) => {
                tracing::warn!(
                    "Index {} has dimension {}, embedder produces {}; recreating (existing vectors are lost)",
                    name,
                    existing.dimension,
                    self.dimensions
                );
                self.delete_index(credentials).await?;
                self.wait_until_gone(credentials).await?;
                self.create_index(credentials).await?;
            }
            None => {
                tracing::info!("Creating index {} with dimension {}", name, self.dimensions);
                self.create_index(credentials).await?;
            }
        }

        let ready = self.wait_until_ready(credentials).await?;
        if ready.dimension != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: ready.dimension,
            });
        }

        let handle = Self::handle_for(ready);
        tracing::info!("Index {} ready at {}", name, handle.host);
        Ok(handle)
    }

    fn handle_for(desc: IndexDescription) -> IndexHandle {
        let host = if desc.host.starts_with("http") {
            desc.host
        } else {
            format!("https://{}", desc.host)
        };
        IndexHandle {
            host: host.trim_end_matches('/').to_string(),
            dimension: desc.dimension,
        }
    }

    /// Locate an index without changing it
    ///
    /// Uses the memoized handle when present, otherwise a single describe.
    /// An absent or not-yet-ready index resolves to `None`.
    async fn lookup_index(&self, credentials: &VectorCredentials) -> Result<Option<IndexHandle>> {
        if let Some(handle) = self.registry.get(credentials) {
            return Ok(Some(handle));
        }
        match self.describe(credentials).await? {
            Some(desc) if desc.status.ready => Ok(Some(Self::handle_for(desc))),
            Some(desc) => {
                tracing::debug!(
                    "Index {} not ready (state {:?})",
                    credentials.index_name,
                    desc.status.state
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn describe(&self, credentials: &VectorCredentials) -> Result<Option<IndexDescription>> {
        let url = self.control_url(&format!("/indexes/{}", credentials.index_name));
        let response = self
            .authorized(self.client.get(&url), credentials)
            .send()
            .await
            .map_err(|e| Error::unavailable(SERVICE, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::from_status(SERVICE, status, body))
            }
        }
    }

    async fn create_index(&self, credentials: &VectorCredentials) -> Result<()> {
        let body = json!({
            "name": credentials.index_name,
            "dimension": self.dimensions,
            "metric": self.config.metric,
            "spec": {
                "serverless": {
                    "cloud": self.config.cloud,
                    "region": self.config.region,
                }
            }
        });

        let response = self
            .authorized(self.client.post(self.control_url("/indexes")), credentials)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::unavailable(SERVICE, e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => {
                tracing::debug!("Index {} already exists", credentials.index_name);
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::from_status(SERVICE, status, body))
            }
        }
    }

    async fn delete_index(&self, credentials: &VectorCredentials) -> Result<()> {
        let url = self.control_url(&format!("/indexes/{}", credentials.index_name));
        let response = self
            .authorized(self.client.delete(&url), credentials)
            .send()
            .await
            .map_err(|e| Error::unavailable(SERVICE, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::from_status(SERVICE, status, body))
            }
        }
    }

    async fn wait_until_gone(&self, credentials: &VectorCredentials) -> Result<()> {
        for _ in 0..self.config.ready_max_attempts {
            if self.describe(credentials).await?.is_none() {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
        Err(Error::unavailable(
            SERVICE,
            format!("index {} was not deleted in time", credentials.index_name),
        ))
    }

    async fn wait_until_ready(&self, credentials: &VectorCredentials) -> Result<IndexDescription> {
        for attempt in 0..self.config.ready_max_attempts {
            match self.describe(credentials).await? {
                Some(desc) if desc.status.ready => return Ok(desc),
                Some(desc) => tracing::debug!(
                    "Index {} not ready (state {:?}, attempt {})",
                    credentials.index_name,
                    desc.status.state,
                    attempt + 1
                ),
                None => tracing::debug!(
                    "Index {} not visible yet (attempt {})",
                    credentials.index_name,
                    attempt + 1
                ),
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
        Err(Error::unavailable(
            SERVICE,
            format!(
                "index {} not ready after {} attempts",
                credentials.index_name, self.config.ready_max_attempts
            ),
        ))
    }

    /// Send a data-plane request; a 404 means the index vanished underneath us
    async fn data_plane(
        &self,
        credentials: &VectorCredentials,
        handle: &IndexHandle,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Option<reqwest::Response>> {
        let url = format!("{}{}", handle.host, path);
        let response = self
            .authorized(self.client.post(&url), credentials)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::unavailable(SERVICE, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::from_status(SERVICE, status, body))
            }
        }
    }
}

#[async_trait]
impl VectorIndexBackend for PineconeIndex {
    async fn upsert(
        &self,
        namespace: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        credentials: &Credentials,
    ) -> Result<()> {
        check_upsert_args(chunks, vectors)?;
        let creds = Self::vector_credentials(credentials)?;
        let handle = self.ensure_index(creds).await?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != handle.dimension) {
            return Err(Error::DimensionMismatch {
                expected: handle.dimension,
                actual: bad.len(),
            });
        }

        let batch_size = self.config.upsert_batch_size.max(1);
        for (batch_chunks, batch_vectors) in chunks.chunks(batch_size).zip(vectors.chunks(batch_size)) {
            let records: Vec<UpsertRecord<'_>> = batch_chunks
                .iter()
                .zip(batch_vectors)
                .map(|(chunk, vector)| UpsertRecord {
                    id: &chunk.id,
                    values: vector,
                    metadata: RecordMetadata {
                        text: &chunk.content,
                        source: &chunk.source,
                        document_id: chunk.document_id.0,
                    },
                })
                .collect();
            let body = json!({ "vectors": records, "namespace": namespace });

            if self.data_plane(creds, &handle, "/vectors/upsert", &body).await?.is_none() {
                self.registry.forget(creds);
                return Err(Error::unavailable(
                    SERVICE,
                    format!("index {} disappeared during upsert", creds.index_name),
                ));
            }
        }

        tracing::debug!(
            "Upserted {} vectors into {}/{}",
            chunks.len(),
            creds.index_name,
            namespace
        );
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        credentials: &Credentials,
    ) -> Result<Vec<RetrievalResult>> {
        let creds = Self::vector_credentials(credentials)?;
        let Some(handle) = self.lookup_index(creds).await? else {
            tracing::debug!("Index {} does not exist; nothing to search", creds.index_name);
            return Ok(Vec::new());
        };
        if handle.dimension != query.len() {
            tracing::warn!(
                "Index {} has dimension {}, query has {}; returning no results until the next ingestion recreates it",
                creds.index_name,
                handle.dimension,
                query.len()
            );
            return Ok(Vec::new());
        }

        let body = json!({
            "namespace": namespace,
            "vector": query,
            "topK": k,
            "includeMetadata": true,
        });

        let response = match self.data_plane(creds, &handle, "/query", &body).await? {
            Some(response) => response,
            None => return Ok(Vec::new()),
        };
        let parsed: QueryResponse = response.json().await?;

        let mut results: Vec<RetrievalResult> = parsed
            .matches
            .into_iter()
            .filter_map(|m| {
                m.metadata.map(|meta| RetrievalResult {
                    content: meta.text,
                    source: meta.source,
                    namespace: namespace.to_string(),
                    similarity: m.score,
                })
            })
            .collect();
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(k);
        Ok(results)
    }

    async fn delete_namespace(&self, namespace: &str, credentials: &Credentials) -> Result<()> {
        let creds = Self::vector_credentials(credentials)?;
        let Some(handle) = self.lookup_index(creds).await? else {
            tracing::debug!("Index {} does not exist; nothing to delete", creds.index_name);
            return Ok(());
        };

        let body = json!({ "deleteAll": true, "namespace": namespace });
        self.data_plane(creds, &handle, "/vectors/delete", &body).await?;

        tracing::info!("Deleted namespace {} from {}", namespace, creds.index_name);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(&self.config.control_url).send().await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
