//! IndexRegistry (§4.10): the daemon's per-user map of index name → on-disk
//! root, persisted inside the daemon config file (`indexes: {name → path}`,
//! §6.2). Aggregates each index's manifest header into an `IndexInfo` for
//! `list_indexes` responses, enriched with the `GitResolver` collaborator
//! when the index root happens to be a Git checkout (§1, §4.10) — a registry
//! with no Git integration degrades to `git: None` rather than failing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{self, DaemonConfig};
use crate::error::{Error, Result};
use crate::git_resolver;
use crate::manifest::Manifest;

/// Cap on `IndexInfo.sample_paths` (§4.10 "sample paths (first N)").
const SAMPLE_PATH_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct GitBlock {
    pub web_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub root: PathBuf,
    pub file_count: usize,
    pub chunk_count: usize,
    pub last_updated: i64,
    pub embedding_model: String,
    pub sample_paths: Vec<String>,
    pub git: Option<GitBlock>,
}

/// Owns the `indexes`/`default_index` slice of the daemon config and keeps
/// it persisted; everything else in `DaemonConfig` passes through untouched
/// on every save so this registry can't clobber unrelated settings.
pub struct IndexRegistry {
    config_path: PathBuf,
    indexes: HashMap<String, PathBuf>,
    default_index: Option<String>,
}

impl IndexRegistry {
    pub fn load(config_path: &Path) -> Result<Self> {
        let daemon_config = config::load_daemon_config(config_path)?;
        Ok(Self {
            config_path: config_path.to_path_buf(),
            indexes: daemon_config.daemon.indexes,
            default_index: daemon_config.daemon.default_index,
        })
    }

    pub fn get(&self, name: &str) -> Option<&PathBuf> {
        self.indexes.get(name)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_index.as_deref()
    }

    pub fn add(&mut self, name: &str, root_path: PathBuf) -> Result<()> {
        let is_first = self.indexes.is_empty();
        self.indexes.insert(name.to_string(), root_path);
        if is_first {
            self.default_index = Some(name.to_string());
        }
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        if self.indexes.remove(name).is_none() {
            return Err(Error::IndexNotFound(name.to_string()));
        }
        if self.default_index.as_deref() == Some(name) {
            self.default_index = None;
        }
        self.save()
    }

    /// Atomic per §4.10: rewrites the whole daemon config via shadow +
    /// rename, the same publish discipline the manifest uses for I4.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.indexes.contains_key(name) {
            return Err(Error::IndexNotFound(name.to_string()));
        }
        self.default_index = Some(name.to_string());
        self.save()
    }

    pub fn list_names(&self) -> Vec<(String, PathBuf)> {
        let mut out: Vec<(String, PathBuf)> = self.indexes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Aggregates `name`'s manifest header into an `IndexInfo`. Returns
    /// `IndexNotFound` if `name` isn't registered; a registered index
    /// without a manifest yet (never ingested) reports zeroed counts rather
    /// than erroring, since "not yet built" is a normal registry state.
    pub fn info(&self, name: &str) -> Result<IndexInfo> {
        let root = self.get(name).ok_or_else(|| Error::IndexNotFound(name.to_string()))?.clone();
        let manifest = Manifest::load(&root.join("manifest.json"))?;

        let (file_count, chunk_count, last_updated, embedding_model, sample_paths) = match &manifest {
            Some(m) => {
                let chunk_count = m.files.values().map(|e| e.chunk_count).sum();
                let mut paths: Vec<String> = m.files.keys().cloned().collect();
                paths.sort();
                paths.truncate(SAMPLE_PATH_COUNT);
                (m.files.len(), chunk_count, m.last_ingest, m.embedding_model.clone(), paths)
            }
            None => (0, 0, 0, String::new(), Vec::new()),
        };

        let git = git_resolver::repo_info(&root).map(|r| GitBlock { web_url: r.web_url, branch: r.branch, commit: r.commit });

        Ok(IndexInfo { name: name.to_string(), root, file_count, chunk_count, last_updated, embedding_model, sample_paths, git })
    }

    pub fn list(&self) -> Vec<IndexInfo> {
        self.list_names().into_iter().filter_map(|(name, _)| self.info(&name).ok()).collect()
    }

    fn save(&self) -> Result<()> {
        let mut daemon_config: DaemonConfig = config::load_daemon_config(&self.config_path).unwrap_or_default();
        daemon_config.daemon.indexes = self.indexes.clone();
        daemon_config.daemon.default_index = self.default_index.clone();

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&daemon_config).map_err(|e| Error::Configuration {
            path: self.config_path.display().to_string(),
            message: format!("failed to serialize daemon config: {e}"),
        })?;

        let file_name = self.config_path.file_name().and_then(|f| f.to_str()).unwrap_or("daemon.yaml");
        let shadow = self.config_path.with_file_name(format!("shadow.{file_name}"));
        std::fs::write(&shadow, yaml)?;
        std::fs::rename(&shadow, &self.config_path)?;
        Ok(())
    }
}
