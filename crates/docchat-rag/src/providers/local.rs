//! Local vector index: one snapshot directory per namespace
//!
//! Layout: `<root>/<namespace>/index.bin`, a bincode snapshot holding the
//! dimensionality and every entry. Deleting a namespace removes its directory.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Chunk, Credentials, RetrievalResult};

use super::vector_store::{check_upsert_args, cosine_similarity, VectorIndexBackend};

const SNAPSHOT_FILE: &str = "index.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    content: String,
    source: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredNamespace {
    dimensions: usize,
    entries: Vec<StoredEntry>,
}

/// Filesystem-backed vector index with brute-force cosine search
///
/// Cloning is cheap and clones share the snapshot cache and locks.
#[derive(Clone)]
pub struct LocalVectorIndex {
    store: Arc<SnapshotStore>,
}

struct SnapshotStore {
    root: PathBuf,
    /// Serialises writers per namespace
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Loaded snapshots; replaced on write, dropped on delete
    cache: DashMap<String, Arc<StoredNamespace>>,
}

impl LocalVectorIndex {
    /// Create an index rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: Arc::new(SnapshotStore::new(root.into())?),
        })
    }

    /// Root directory holding namespace directories
    pub fn root(&self) -> &Path {
        &self.store.root
    }
}

impl SnapshotStore {
    fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Config(format!(
                "Failed to create index directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            locks: DashMap::new(),
            cache: DashMap::new(),
        })
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        if namespace.is_empty()
            || namespace
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(Error::vector_db(format!("Invalid namespace: {:?}", namespace)));
        }
        Ok(self.root.join(namespace))
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Snapshot of `namespace`; callers hold the namespace lock
    fn load(&self, namespace: &str) -> Result<Option<Arc<StoredNamespace>>> {
        if let Some(cached) = self.cache.get(namespace) {
            return Ok(Some(Arc::clone(&cached)));
        }

        let path = self.namespace_dir(namespace)?.join(SNAPSHOT_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (snapshot, _): (StoredNamespace, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| Error::vector_db(format!("Corrupt index {}: {}", path.display(), e)),
            )?;

        let snapshot = Arc::new(snapshot);
        self.cache.insert(namespace.to_string(), Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    fn write(&self, namespace: &str, snapshot: &StoredNamespace) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        std::fs::create_dir_all(&dir)?;

        let bytes = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .map_err(|e| Error::vector_db(format!("Failed to encode index: {}", e)))?;

        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }

    fn upsert_blocking(
        &self,
        namespace: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let dimensions = match vectors.first() {
            Some(v) => v.len(),
            None => return Ok(()),
        };

        let lock = self.lock_for(namespace);
        let _guard = lock.lock();

        let existing = self.load(namespace)?;
        let mut snapshot = match existing {
            Some(current) if current.dimensions == dimensions => (*current).clone(),
            Some(current) => {
                tracing::warn!(
                    "Namespace {} holds {}-dimensional vectors, recreating for {} dimensions",
                    namespace,
                    current.dimensions,
                    dimensions
                );
                StoredNamespace {
                    dimensions,
                    entries: Vec::new(),
                }
            }
            None => StoredNamespace {
                dimensions,
                entries: Vec::new(),
            },
        };

        let mut positions: HashMap<String, usize> = snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let entry = StoredEntry {
                id: chunk.id.clone(),
                content: chunk.content.clone(),
                source: chunk.source.clone(),
                vector: vector.clone(),
            };
            match positions.get(&chunk.id) {
                Some(&i) => snapshot.entries[i] = entry,
                None => {
                    positions.insert(chunk.id.clone(), snapshot.entries.len());
                    snapshot.entries.push(entry);
                }
            }
        }

        self.write(namespace, &snapshot)?;
        tracing::debug!(
            "Namespace {} now holds {} vectors",
            namespace,
            snapshot.entries.len()
        );
        self.cache.insert(namespace.to_string(), Arc::new(snapshot));
        Ok(())
    }

    fn search_blocking(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let cached = self.cache.get(namespace).map(|c| Arc::clone(&c));
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => {
                let lock = self.lock_for(namespace);
                let _guard = lock.lock();
                match self.load(namespace)? {
                    Some(snapshot) => snapshot,
                    None => return Ok(Vec::new()),
                }
            }
        };

        if snapshot.dimensions != query.len() {
            tracing::warn!(
                "Namespace {} holds {}-dimensional vectors, query has {}; skipping",
                namespace,
                snapshot.dimensions,
                query.len()
            );
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &StoredEntry)> = snapshot
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(similarity, e)| RetrievalResult {
                content: e.content.clone(),
                source: e.source.clone(),
                namespace: namespace.to_string(),
                similarity,
            })
            .collect())
    }

    fn delete_blocking(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        let lock = self.lock_for(namespace);
        let _guard = lock.lock();

        let removed = match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!("Deleted local namespace {}", namespace);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        self.cache.remove(namespace);
        removed
    }
}

#[async_trait]
impl VectorIndexBackend for LocalVectorIndex {
    async fn upsert(
        &self,
        namespace: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        _credentials: &Credentials,
    ) -> Result<()> {
        check_upsert_args(chunks, vectors)?;
        let store = Arc::clone(&self.store);
        let namespace = namespace.to_string();
        let chunks = chunks.to_vec();
        let vectors = vectors.to_vec();
        tokio::task::spawn_blocking(move || store.upsert_blocking(&namespace, &chunks, &vectors))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        _credentials: &Credentials,
    ) -> Result<Vec<RetrievalResult>> {
        let store = Arc::clone(&self.store);
        let namespace = namespace.to_string();
        let query = query.to_vec();
        tokio::task::spawn_blocking(move || store.search_blocking(&namespace, &query, k))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn delete_namespace(&self, namespace: &str, _credentials: &Credentials) -> Result<()> {
        let store = Arc::clone(&self.store);
        let namespace = namespace.to_string();
        tokio::task::spawn_blocking(move || store.delete_blocking(&namespace))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.store.root.exists())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;
    use tempfile::TempDir;

    fn chunk(doc: i64, index: u32, text: &str) -> Chunk {
        Chunk::new(DocumentId(doc), index, text.to_string(), "notes.txt".to_string())
    }

    fn index() -> (TempDir, LocalVectorIndex) {
        let dir = TempDir::new().unwrap();
        let index = LocalVectorIndex::new(dir.path()).unwrap();
        (dir, index)
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let (_dir, index) = index();
        let creds = Credentials::default();
        let chunks = vec![chunk(1, 0, "east"), chunk(1, 1, "north"), chunk(1, 2, "north-east")];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        index.upsert("1", &chunks, &vectors, &creds).await.unwrap();

        let results = index.search("1", &[0.0, 1.0], 2, &creds).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "north");
        assert_eq!(results[1].content, "north-east");
        assert!(results[0].similarity >= results[1].similarity);
        assert_eq!(results[0].namespace, "1");
    }

    #[tokio::test]
    async fn test_missing_namespace_is_empty() {
        let (_dir, index) = index();
        let results = index
            .search("404", &[1.0, 0.0], 20, &Credentials::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_persists() {
        let (dir, index) = index();
        let creds = Credentials::default();
        let chunks = vec![chunk(7, 0, "alpha"), chunk(7, 1, "beta")];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        index.upsert("7", &chunks, &vectors, &creds).await.unwrap();
        index.upsert("7", &chunks, &vectors, &creds).await.unwrap();
        assert!(dir.path().join("7").join(SNAPSHOT_FILE).exists());

        // A fresh instance reads the snapshot from disk
        let reopened = LocalVectorIndex::new(dir.path()).unwrap();
        let results = reopened.search("7", &[1.0, 0.0], 10, &creds).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_dimension_change_recreates_namespace() {
        let (_dir, index) = index();
        let creds = Credentials::default();
        index
            .upsert("3", &[chunk(3, 0, "old")], &[vec![1.0, 0.0]], &creds)
            .await
            .unwrap();
        index
            .upsert("3", &[chunk(3, 0, "new")], &[vec![0.0, 0.0, 1.0]], &creds)
            .await
            .unwrap();

        assert!(index.search("3", &[1.0, 0.0], 5, &creds).await.unwrap().is_empty());
        let results = index.search("3", &[0.0, 0.0, 1.0], 5, &creds).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "new");
    }

    #[tokio::test]
    async fn test_delete_twice_is_noop() {
        let (dir, index) = index();
        let creds = Credentials::default();
        index
            .upsert("9", &[chunk(9, 0, "x")], &[vec![1.0]], &creds)
            .await
            .unwrap();

        index.delete_namespace("9", &creds).await.unwrap();
        index.delete_namespace("9", &creds).await.unwrap();
        assert!(!dir.path().join("9").exists());
        assert!(index.search("9", &[1.0], 5, &creds).await.unwrap().is_empty());
    }

    #[test]
    fn test_namespace_cannot_escape_root() {
        let (_dir, index) = index();
        assert!(index.store.namespace_dir("../etc").is_err());
        assert!(index.store.namespace_dir("").is_err());
    }
}
