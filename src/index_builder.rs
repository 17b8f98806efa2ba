//! IndexBuilder (§4.7): orchestrates incremental ingest — scan, partition
//! against the manifest, chunk + embed changed documents, delete removed
//! ones, rebuild the document-level similarity graph, and publish the
//! manifest atomically (I4). The only component allowed to mutate an index
//! (I5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, StreamExt};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{self, Embedder, DEFAULT_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::git_resolver;
use crate::graph_store::GraphStore;
use crate::keyword_store::KeywordStore;
use crate::manifest::Manifest;
use crate::models::{chunk_id, stable_hash, Edge, FileEntry};
use crate::scanner;
use crate::vector_store::VectorStore;

/// Counts from one `build()` call, surfaced to the CLI/daemon caller.
#[derive(Debug, Default, Clone)]
pub struct BuildStats {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// True if a stop signal fired before the manifest was published; the
    /// prior manifest is left untouched in that case.
    pub aborted: bool,
}

pub struct IndexBuilder {
    root: PathBuf,
    config: Config,
    embedder: Arc<dyn Embedder>,
}

fn worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).div_ceil(2).clamp(1, 4)
}

impl IndexBuilder {
    pub fn new(root: PathBuf, config: Config, embedder: Arc<dyn Embedder>) -> Self {
        Self { root, config, embedder }
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    fn vector_path(&self) -> PathBuf {
        match self.config.storage.backend {
            crate::config::StorageBackend::DenseFile => self.root.join("vectors.bin"),
            crate::config::StorageBackend::ColumnarAnn => self.root.join("columnar"),
        }
    }

    fn keyword_path(&self) -> PathBuf {
        self.root.join("keywords.db")
    }

    fn graph_path(&self) -> PathBuf {
        self.root.join("graph.bin")
    }

    /// Runs one ingest. `full=true` treats every scanned file as `added` and
    /// wipes the backing stores before rebuilding. `stop`, if provided, is
    /// polled at each phase boundary (§5) and aborts cleanly without
    /// touching the live manifest.
    pub async fn build(&self, full: bool, stop: Option<Arc<AtomicBool>>) -> Result<BuildStats> {
        let should_stop = |stop: &Option<Arc<AtomicBool>>| stop.as_ref().map(|s| s.load(Ordering::SeqCst)).unwrap_or(false);

        let span = tracing::info_span!("ingest", root = %self.root.display(), full);
        let _enter = span.enter();

        let existing = Manifest::load(&self.manifest_path())?;
        if let Some(m) = &existing {
            m.check_compatible(&self.embedder.identifier(), self.embedder.dimension(), self.config.storage.backend)?;
        }

        if full {
            for path in [self.manifest_path(), self.vector_path(), self.keyword_path(), self.graph_path()] {
                let _ = std::fs::remove_file(&path);
                let _ = std::fs::remove_dir_all(&path);
            }
        }

        let mut manifest = if full || existing.is_none() {
            Manifest::empty(self.embedder.identifier(), self.embedder.dimension(), self.config.storage.backend, &self.config.chunking)
        } else {
            existing.unwrap()
        };

        let (scanned, stats) = scanner::scan(&self.config.sources)?;
        tracing::info!(visited = stats.visited, skipped_binary = stats.skipped_binary, skipped_ignored = stats.skipped_ignored, "scan phase complete");

        if should_stop(&stop) {
            return Ok(BuildStats { aborted: true, ..Default::default() });
        }

        // Partition against the manifest (§4.7 step 3).
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut seen_paths: std::collections::HashSet<String> = std::collections::HashSet::new();

        for file in &scanned {
            seen_paths.insert(file.relative_path.clone());
            let content = match std::fs::read_to_string(&file.absolute_path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %file.relative_path, error = %e, "failed to read file, skipping");
                    continue;
                }
            };
            let content_hash = stable_hash(&content);

            match manifest.files.get(&file.relative_path) {
                Some(entry) if entry.content_hash == content_hash => {}
                Some(_) => modified.push((file.clone(), content, content_hash)),
                None => added.push((file.clone(), content, content_hash)),
            }
        }

        let removed: Vec<String> =
            manifest.files.keys().filter(|path| !seen_paths.contains(path.as_str())).cloned().collect();
        let unchanged_count = scanned.len().saturating_sub(added.len()).saturating_sub(modified.len());

        let mut vector_store = VectorStore::open(self.config.storage.backend, &self.vector_path(), self.embedder.dimension()).await?;
        let keyword_store = KeywordStore::open(&self.keyword_path()).await?;

        // Delete removed documents (§4.7 step 6).
        for path in &removed {
            if let Some(entry) = manifest.files.remove(path) {
                for i in 0..entry.chunk_count as i64 {
                    let id = if manifest.chunking_enabled { chunk_id(&entry.doc_id, i) } else { entry.doc_id.clone() };
                    vector_store.delete(&id).await?;
                    keyword_store.delete(&id).await?;
                }
            }
        }

        if should_stop(&stop) {
            return Ok(BuildStats { aborted: true, removed: removed.len(), ..Default::default() });
        }

        // Chunk + embed added ∪ modified (§4.7 step 5).
        let to_process = added.len() + modified.len();
        let mut pending: Vec<(FileEntry, String, Vec<crate::models::Chunk>)> = Vec::new();

        for (file, content, content_hash) in added.iter().chain(modified.iter()) {
            let doc_id = stable_hash(&file.relative_path);
            let chunks = chunk_document(
                &doc_id,
                content,
                self.config.chunking.enabled,
                self.config.chunking.max_tokens,
                self.config.chunking.overlap_tokens,
            );
            let git_time = git_resolver::file_last_commit_time(
                file.absolute_path.parent().unwrap_or(&self.root),
                &file.absolute_path,
            );
            let entry = FileEntry {
                content_hash: content_hash.clone(),
                mtime: file.mtime,
                size: file.size,
                doc_id: doc_id.clone(),
                type_: file.type_.clone(),
                git_last_commit_time: git_time,
                chunk_count: chunks.len(),
            };
            pending.push((entry, file.relative_path.clone(), chunks));
        }

        // Batch every pending chunk's text across files, embed concurrently
        // via a bounded worker pool, then apply upserts single-threaded.
        let mut all_chunks: Vec<&crate::models::Chunk> = Vec::new();
        for (_, _, chunks) in &pending {
            all_chunks.extend(chunks.iter());
        }

        let batches: Vec<Vec<&crate::models::Chunk>> =
            all_chunks.chunks(DEFAULT_BATCH_SIZE).map(|c| c.to_vec()).collect();

        let embedder = self.embedder.clone();
        let embedded: Vec<Result<(Vec<&crate::models::Chunk>, Vec<Vec<f32>>)>> = stream::iter(batches.into_iter())
            .map(|batch| {
                let embedder = embedder.clone();
                async move {
                    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                    let vectors = embedder.embed_batch(&texts).await?;
                    Ok((batch, vectors))
                }
            })
            .buffer_unordered(worker_count())
            .collect()
            .await;

        let mut vectors_by_chunk_id: HashMap<String, Vec<f32>> = HashMap::with_capacity(all_chunks.len());
        for result in embedded {
            let (batch, vectors) = result?;
            for (chunk, vector) in batch.into_iter().zip(vectors.into_iter()) {
                vectors_by_chunk_id.insert(chunk.chunk_id.clone(), vector);
            }
        }

        if should_stop(&stop) {
            return Ok(BuildStats { aborted: true, removed: removed.len(), ..Default::default() });
        }

        for (entry, relative_path, chunks) in &pending {
            // Re-ingesting a file that previously had more chunks than it
            // does now must drop the stale tail chunk ids.
            if let Some(old) = manifest.files.get(relative_path) {
                for i in chunks.len() as i64..old.chunk_count as i64 {
                    let id = if manifest.chunking_enabled { chunk_id(&old.doc_id, i) } else { old.doc_id.clone() };
                    vector_store.delete(&id).await?;
                    keyword_store.delete(&id).await?;
                }
            }

            for chunk in chunks {
                let vector = vectors_by_chunk_id.remove(&chunk.chunk_id).ok_or_else(|| {
                    Error::EmbedFailed(format!("missing embedding for chunk {}", chunk.chunk_id))
                })?;
                let id = if manifest.chunking_enabled { chunk.chunk_id.clone() } else { entry.doc_id.clone() };
                vector_store.upsert(&id, vector).await?;
                keyword_store.upsert(&id, &chunk.text).await?;
            }
            manifest.files.insert(relative_path.clone(), entry.clone());
        }
        vector_store.flush().await?;

        if should_stop(&stop) {
            return Ok(BuildStats { aborted: true, added: added.len(), modified: modified.len(), removed: removed.len(), unchanged: unchanged_count });
        }

        // Document-level vectors for graph construction (§4.7 step 7, §9).
        let mut doc_vectors: HashMap<String, Vec<f32>> = HashMap::with_capacity(manifest.files.len());
        for entry in manifest.files.values() {
            let vector = if manifest.chunking_enabled {
                let mut sum: Option<Vec<f32>> = None;
                let mut n = 0usize;
                for i in 0..entry.chunk_count as i64 {
                    if let Some(v) = vector_store.get(&chunk_id(&entry.doc_id, i)).await? {
                        n += 1;
                        sum = Some(match sum {
                            None => v,
                            Some(mut acc) => {
                                for (a, b) in acc.iter_mut().zip(v.iter()) {
                                    *a += *b;
                                }
                                acc
                            }
                        });
                    }
                }
                match sum {
                    Some(mut acc) if n > 0 => {
                        for x in acc.iter_mut() {
                            *x /= n as f32;
                        }
                        embedding::normalize(&mut acc);
                        acc
                    }
                    _ => continue,
                }
            } else {
                match vector_store.get(&entry.doc_id).await? {
                    Some(v) => v,
                    None => continue,
                }
            };
            doc_vectors.insert(entry.doc_id.clone(), vector);
        }

        let edges = all_pairs_above(&doc_vectors, self.config.graph.similarity_threshold);
        let mut graph_store = GraphStore::open(&self.graph_path())?;
        graph_store.replace_all(edges)?;

        manifest.last_ingest = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        manifest.save_atomic(&self.manifest_path())?;

        tracing::info!(added = added.len(), modified = modified.len(), removed = removed.len(), unchanged = unchanged_count, "ingest complete");

        Ok(BuildStats { added: added.len(), modified: modified.len(), removed: removed.len(), unchanged: unchanged_count, aborted: false })
    }
}

/// Blocked O(N²/2) scan over document-level vectors (§4.6, §9): the graph is
/// always file-to-file even when chunking stores vectors at chunk
/// granularity, so this never delegates to `VectorStore::all_pairs_above`.
fn all_pairs_above(doc_vectors: &HashMap<String, Vec<f32>>, threshold: f32) -> Vec<Edge> {
    let mut ids: Vec<&String> = doc_vectors.keys().collect();
    ids.sort();

    let mut edges = Vec::new();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let a = ids[i];
            let b = ids[j];
            let score = embedding::cosine(&doc_vectors[a], &doc_vectors[b]);
            if score >= threshold {
                edges.push(Edge::new(a, b, score));
            }
        }
    }
    edges
}

/// Scaffolds a fresh project config at `<index_root>/config.yaml` (§10.5).
pub fn scaffold_config(index_root: &Path, source_path: &Path) -> Result<()> {
    std::fs::create_dir_all(index_root)?;
    let config_path = index_root.join("config.yaml");
    if config_path.exists() {
        return Err(Error::Configuration { path: config_path.display().to_string(), message: "config already exists".to_string() });
    }
    let quoted_path = serde_yaml::to_string(&source_path.display().to_string())
        .unwrap_or_else(|_| "\".\"\n".to_string());
    let yaml = format!("sources:\n  - path: {}\n    use_gitignore: true\n", quoted_path.trim_end());
    std::fs::write(&config_path, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, Config, GraphConfig, HybridConfig, RecencyConfig, StorageBackend, StorageConfig};
    use crate::embedding::HashingEmbedder;
    use crate::models::Source;
    use tempfile::tempdir;

    fn test_config(source_root: &Path) -> Config {
        Config {
            sources: vec![Source {
                path: source_root.to_path_buf(),
                glob: vec![],
                type_: None,
                ignore_preset: None,
                ignore: vec![],
                use_gitignore: false,
            }],
            embedding: crate::config::EmbeddingConfig { model: "hashing-reference-embedder-v1/8".to_string(), dimension: 8 },
            storage: StorageConfig { backend: StorageBackend::DenseFile, path: PathBuf::from(".gundog") },
            graph: GraphConfig { similarity_threshold: 0.99, expand_threshold: 0.5, max_expand_depth: 2 },
            hybrid: HybridConfig::default(),
            recency: RecencyConfig::default(),
            chunking: ChunkingConfig { enabled: false, max_tokens: 512, overlap_tokens: 50 },
        }
    }

    #[tokio::test]
    async fn full_ingest_populates_manifest_and_stores() {
        let source_dir = tempdir().unwrap();
        let index_dir = tempdir().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "hello world").unwrap();
        std::fs::write(source_dir.path().join("b.md"), "goodbye world").unwrap();

        let config = test_config(source_dir.path());
        let embedder = Arc::new(HashingEmbedder::new(8));
        let builder = IndexBuilder::new(index_dir.path().to_path_buf(), config, embedder);

        let stats = builder.build(true, None).await.unwrap();
        assert_eq!(stats.added, 2);

        let manifest = Manifest::load(&index_dir.path().join("manifest.json")).unwrap().unwrap();
        assert_eq!(manifest.files.len(), 2);
    }

    #[tokio::test]
    async fn incremental_add_preserves_prior_vectors() {
        let source_dir = tempdir().unwrap();
        let index_dir = tempdir().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "hello world").unwrap();
        std::fs::write(source_dir.path().join("b.md"), "goodbye world").unwrap();

        let config = test_config(source_dir.path());
        let embedder = Arc::new(HashingEmbedder::new(8));
        let builder = IndexBuilder::new(index_dir.path().to_path_buf(), config.clone(), embedder.clone());
        builder.build(false, None).await.unwrap();

        let first_manifest = Manifest::load(&index_dir.path().join("manifest.json")).unwrap().unwrap();
        let doc_a_id = first_manifest.files.get("a.md").unwrap().doc_id.clone();

        std::fs::write(source_dir.path().join("c.md"), "a third file").unwrap();
        let builder2 = IndexBuilder::new(index_dir.path().to_path_buf(), config, embedder);
        let stats = builder2.build(false, None).await.unwrap();

        assert_eq!(stats.added, 1);
        assert_eq!(stats.unchanged, 2);

        let second_manifest = Manifest::load(&index_dir.path().join("manifest.json")).unwrap().unwrap();
        assert_eq!(second_manifest.files.len(), 3);
        assert_eq!(second_manifest.files.get("a.md").unwrap().doc_id, doc_a_id);
    }

    #[tokio::test]
    async fn deletion_removes_ids_from_stores() {
        let source_dir = tempdir().unwrap();
        let index_dir = tempdir().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "hello world").unwrap();
        std::fs::write(source_dir.path().join("b.md"), "goodbye world").unwrap();

        let config = test_config(source_dir.path());
        let embedder = Arc::new(HashingEmbedder::new(8));
        let builder = IndexBuilder::new(index_dir.path().to_path_buf(), config.clone(), embedder.clone());
        builder.build(false, None).await.unwrap();

        std::fs::remove_file(source_dir.path().join("b.md")).unwrap();
        let builder2 = IndexBuilder::new(index_dir.path().to_path_buf(), config, embedder);
        let stats = builder2.build(false, None).await.unwrap();

        assert_eq!(stats.removed, 1);
        let manifest = Manifest::load(&index_dir.path().join("manifest.json")).unwrap().unwrap();
        assert!(!manifest.files.contains_key("b.md"));

        let vector_store = VectorStore::open(StorageBackend::DenseFile, &index_dir.path().join("vectors.bin"), 8).await.unwrap();
        assert_eq!(vector_store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn graph_built_from_similar_documents() {
        let source_dir = tempdir().unwrap();
        let index_dir = tempdir().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "identical text").unwrap();
        std::fs::write(source_dir.path().join("b.md"), "identical text").unwrap();

        let config = test_config(source_dir.path());
        let embedder = Arc::new(HashingEmbedder::new(8));
        let builder = IndexBuilder::new(index_dir.path().to_path_buf(), config, embedder);
        builder.build(true, None).await.unwrap();

        let graph_store = GraphStore::open(&index_dir.path().join("graph.bin")).unwrap();
        let manifest = Manifest::load(&index_dir.path().join("manifest.json")).unwrap().unwrap();
        let doc_a = manifest.files.get("a.md").unwrap().doc_id.clone();
        let related = graph_store.expand(&[doc_a], 0.5, 1);
        assert_eq!(related.len(), 1);
    }
}
