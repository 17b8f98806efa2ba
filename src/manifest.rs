//! The per-index manifest: embedding identity, chunking settings, the
//! ingested file map, and the atomic shadow-then-rename publish discipline
//! that defines I4.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::{ChunkingConfig, StorageBackend};
use crate::error::{Error, Result};
use crate::models::FileEntry;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub storage_backend: StorageBackend,
    pub chunking_enabled: bool,
    pub chunking_max_tokens: usize,
    pub chunking_overlap_tokens: usize,
    pub files: HashMap<String, FileEntry>,
    pub last_ingest: i64,
}

impl Manifest {
    pub fn empty(
        embedding_model: String,
        embedding_dimension: usize,
        storage_backend: StorageBackend,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedding_model,
            embedding_dimension,
            storage_backend,
            chunking_enabled: chunking.enabled,
            chunking_max_tokens: chunking.max_tokens,
            chunking_overlap_tokens: chunking.overlap_tokens,
            files: HashMap::new(),
            last_ingest: 0,
        }
    }

    /// Loads the manifest at `path`, or `None` if it doesn't exist yet
    /// (treated as an empty index per §4.7 step 1).
    pub fn load(path: &Path) -> Result<Option<Manifest>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| Error::Fatal(format!("manifest at {} is corrupt: {e}", path.display())))?;
        Ok(Some(manifest))
    }

    /// Refuses to open the index for queries when the configured model,
    /// dimension, or storage backend disagree with what's on disk — a
    /// fatal mismatch per §3 and §9 (no in-place backend switch).
    pub fn check_compatible(&self, model: &str, dimension: usize, backend: StorageBackend) -> Result<()> {
        if self.embedding_model != model || self.embedding_dimension != dimension {
            return Err(Error::Fatal(format!(
                "manifest embedding identity ({}/{}) does not match configured ({model}/{dimension})",
                self.embedding_model, self.embedding_dimension
            )));
        }
        if self.storage_backend != backend {
            return Err(Error::Fatal(
                "manifest storage backend differs from configured backend; a backend change requires full=true".to_string(),
            ));
        }
        Ok(())
    }

    /// Writes a shadow file, fsyncs, then renames onto the live path — I4's
    /// atomic publish. The shadow file is never itself read back by a loader.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let shadow_path = shadow_path(path);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Ingest(format!("failed to serialize manifest: {e}")))?;

        {
            use std::io::Write;
            let mut f = std::fs::File::create(&shadow_path)?;
            f.write_all(content.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&shadow_path, path)?;
        Ok(())
    }
}

pub fn shadow_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("manifest.json");
    path.with_file_name(format!("shadow.{file_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_manifest_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        assert!(Manifest::load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let chunking = ChunkingConfig::default();
        let mut m = Manifest::empty("model-a".to_string(), 16, StorageBackend::DenseFile, &chunking);
        m.files.insert(
            "a.md".to_string(),
            FileEntry {
                content_hash: "h".to_string(),
                mtime: 1,
                size: 2,
                doc_id: "d".to_string(),
                type_: None,
                git_last_commit_time: None,
                chunk_count: 1,
            },
        );
        m.save_atomic(&path).unwrap();
        assert!(!shadow_path(&path).exists());

        let loaded = Manifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.embedding_model, "model-a");
    }

    #[test]
    fn rejects_model_mismatch() {
        let chunking = ChunkingConfig::default();
        let m = Manifest::empty("model-a".to_string(), 16, StorageBackend::DenseFile, &chunking);
        assert!(m.check_compatible("model-b", 16, StorageBackend::DenseFile).is_err());
        assert!(m.check_compatible("model-a", 32, StorageBackend::DenseFile).is_err());
        assert!(m.check_compatible("model-a", 16, StorageBackend::ColumnarAnn).is_err());
        assert!(m.check_compatible("model-a", 16, StorageBackend::DenseFile).is_ok());
    }
}
