//! VectorStore: persists `(id → vector)` and answers kNN and all-pairs
//! queries (§4.4). Expressed as a tagged enum over the two backends rather
//! than a trait object (§9 design note), since the set of operations is
//! small and fixed and both backends are async.

pub mod columnar_ann;
pub mod dense_file;

use crate::config::StorageBackend as StorageBackendKind;
use crate::embedding::normalize;
use crate::error::Result;
use std::path::Path;

pub use columnar_ann::ColumnarAnnStore;
pub use dense_file::DenseFileStore;

/// Backend-agnostic handle used by `IndexBuilder`, `HybridRanker`, and
/// `GraphStore`'s graph-build step.
pub enum VectorStore {
    DenseFile(DenseFileStore),
    ColumnarAnn(ColumnarAnnStore),
}

impl VectorStore {
    pub async fn open(kind: StorageBackendKind, path: &Path, dimension: usize) -> Result<Self> {
        Ok(match kind {
            StorageBackendKind::DenseFile => VectorStore::DenseFile(DenseFileStore::open(path, dimension)?),
            StorageBackendKind::ColumnarAnn => {
                VectorStore::ColumnarAnn(ColumnarAnnStore::open(path, dimension).await?)
            }
        })
    }

    /// Normalizes `vector` (I1) before handing it to the backend. Idempotent
    /// per P6: a second upsert of the same `(id, vector)` is a no-op.
    pub async fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        let mut v = vector;
        normalize(&mut v);
        match self {
            VectorStore::DenseFile(s) => s.upsert(id, v),
            VectorStore::ColumnarAnn(s) => s.upsert(id, v).await,
        }
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        match self {
            VectorStore::DenseFile(s) => s.delete(id),
            VectorStore::ColumnarAnn(s) => s.delete(id).await,
        }
    }

    pub async fn knn(&self, query: &[f32], k: usize, min_score: Option<f32>) -> Result<Vec<(String, f32)>> {
        match self {
            VectorStore::DenseFile(s) => s.knn(query, k, min_score),
            VectorStore::ColumnarAnn(s) => s.knn(query, k, min_score).await,
        }
    }

    pub async fn all_pairs_above(&self, threshold: f32) -> Result<Vec<(String, String, f32)>> {
        match self {
            VectorStore::DenseFile(s) => s.all_pairs_above(threshold),
            VectorStore::ColumnarAnn(s) => s.all_pairs_above(threshold).await,
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        match self {
            VectorStore::DenseFile(s) => s.flush(),
            VectorStore::ColumnarAnn(s) => s.maybe_build_index().await,
        }
    }

    /// Point lookup, used by `IndexBuilder` to reconstruct document-level
    /// vectors from their constituent chunk vectors via `chunk_count`.
    pub async fn get(&self, id: &str) -> Result<Option<Vec<f32>>> {
        match self {
            VectorStore::DenseFile(s) => Ok(s.get(id)),
            VectorStore::ColumnarAnn(s) => s.get(id).await,
        }
    }

    pub async fn len(&self) -> Result<usize> {
        match self {
            VectorStore::DenseFile(s) => Ok(s.len()),
            VectorStore::ColumnarAnn(s) => s.len().await,
        }
    }
}
