//! The `Embedder` external contract (§4.3) and its bundled reference
//! implementation.
//!
//! The real sentence-embedding model is explicitly out of scope (§1): this
//! crate ships only a deterministic, content-derived hashing embedder so the
//! rest of the pipeline is exercisable end to end without a network call or
//! a model file. Production deployments supply their own [`Embedder`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maps text to unit-norm float vectors of a fixed dimension.
///
/// Vectors returned by `embed_batch` need not be normalized; callers
/// normalize on store (I1). Implementations are batched up to an
/// implementation-defined size by the caller (default 32, §5).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Stable id encoding model name + version, persisted in the manifest.
    fn identifier(&self) -> String;

    fn dimension(&self) -> usize;
}

/// Default batch size the engine chunks embed requests into (§4.3, §5).
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const MAX_BATCH_SIZE: usize = 32;

/// A deterministic embedder that derives a vector from the SHA-256 digest of
/// the input text, expanded to `dimension` floats via a simple counter-mode
/// stream. Not semantically meaningful, but stable, unit-norm after storage,
/// and sufficient to exercise kNN, BM25 fusion, and graph construction in
/// tests without any external dependency.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.len() > MAX_BATCH_SIZE {
            return Err(Error::EmbedFailed(format!(
                "batch of {} exceeds max batch size {MAX_BATCH_SIZE}",
                texts.len()
            )));
        }
        Ok(texts.iter().map(|t| hash_vector(t, self.dimension)).collect())
    }

    fn identifier(&self) -> String {
        format!("hashing-reference-embedder-v1/{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Builds the `Embedder` a running index uses. `config.model` names a real
/// sentence-embedding model to download and run, which is out of scope for
/// this crate (§1, §4.3); every configured model currently resolves to the
/// bundled [`HashingEmbedder`], sized from `config.dimension`. Swapping this
/// function's body for a real inference backend is the intended extension
/// point — nothing else in the engine depends on how vectors are produced.
pub fn build_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    tracing::warn!(
        model = %config.model,
        "no real embedding backend is bundled; falling back to the deterministic reference embedder"
    );
    Arc::new(HashingEmbedder::new(config.dimension))
}

fn hash_vector(text: &str, dimension: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    let mut out = Vec::with_capacity(dimension);
    let mut counter: u64 = 0;
    while out.len() < dimension {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks(4) {
            if out.len() >= dimension {
                break;
            }
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            let as_u32 = u32::from_le_bytes(bytes);
            // Map into [-1, 1] so the resulting vector isn't all-positive.
            let v = (as_u32 as f64 / u32::MAX as f64) * 2.0 - 1.0;
            out.push(v as f32);
        }
        counter += 1;
    }
    out
}

/// L2-normalizes `v` in place; I1 requires every stored vector satisfy
/// `‖v‖ ∈ [1-ε, 1+ε]`. A zero vector is left as a zero vector (degenerate
/// input the embedder should not normally produce).
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    normalize(&mut v);
    v
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

pub fn vector_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let e = HashingEmbedder::new(16);
        let a = e.embed_batch(&["hello world".to_string()]).await.unwrap();
        let b = e.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn distinct_text_yields_distinct_vectors() {
        let e = HashingEmbedder::new(8);
        let out = e.embed_batch(&["alpha".to_string(), "beta".to_string()]).await.unwrap();
        assert_ne!(out[0], out[1]);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0f32, 4.0];
        normalize(&mut v);
        let norm = vector_norm(&v);
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_of_identical_normalized_vectors_is_one() {
        let v = normalized(vec![1.0, 2.0, 3.0]);
        let c = cosine(&v, &v);
        assert!((c - 1.0).abs() < 1e-4);
    }
}
