//! Vector index backend trait

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{Chunk, Credentials, RetrievalResult};

/// Namespaced vector storage and similarity search
///
/// Implementations:
/// - `LocalVectorIndex`: one snapshot directory per namespace on local disk
/// - `PineconeIndex`: managed Pinecone index, one namespace per document
///
/// A namespace that was never written behaves as empty: searching it yields
/// no results and deleting it succeeds.
#[async_trait]
pub trait VectorIndexBackend: Send + Sync {
    /// Insert or replace vectors, creating the namespace if needed
    ///
    /// `chunks[i]` is stored with `vectors[i]`; re-upserting the same chunk
    /// ids overwrites them.
    async fn upsert(
        &self,
        namespace: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        credentials: &Credentials,
    ) -> Result<()>;

    /// Top `k` entries by descending similarity
    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        credentials: &Credentials,
    ) -> Result<Vec<RetrievalResult>>;

    /// Remove a namespace and everything in it
    async fn delete_namespace(&self, namespace: &str, credentials: &Credentials) -> Result<()>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Reject upserts whose inputs do not line up
pub(crate) fn check_upsert_args(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(Error::vector_db(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    if let Some(first) = vectors.first() {
        if let Some(bad) = vectors.iter().find(|v| v.len() != first.len()) {
            return Err(Error::DimensionMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }
    }
    Ok(())
}

/// Cosine similarity; zero when either vector is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_upsert_args_must_line_up() {
        let chunk = Chunk::new(DocumentId(1), 0, "a".to_string(), "a.txt".to_string());
        assert!(check_upsert_args(&[chunk.clone()], &[]).is_err());
        assert!(matches!(
            check_upsert_args(&[chunk.clone(), chunk], &[vec![0.0; 3], vec![0.0; 4]]),
            Err(Error::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }
}
