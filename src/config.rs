//! Configuration parsing and validation.
//!
//! Gundog is configured via two YAML files: a per-index project config
//! (`.gundog/config.yaml`, §6.1) and a daemon config
//! (`~/.config/gundog/daemon.yaml`, §6.2). Both are plain `serde` structs
//! with `#[serde(default)]` encoding every documented default, validated
//! once at load time rather than scattered across call sites.

use crate::models::Source;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sources: Vec<Source>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub recency: RecencyConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Dimension `D` of vectors the configured embedder produces. The real
    /// sentence-embedding model is an external contract (§4.3); this crate's
    /// bundled reference embedder is sized from this field directly.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: default_model(), dimension: default_dimension() }
    }
}

fn default_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

fn default_dimension() -> usize {
    384
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    DenseFile,
    ColumnarAnn,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_backend(), path: default_storage_path() }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::DenseFile
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".gundog")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_expand_threshold")]
    pub expand_threshold: f32,
    #[serde(default = "default_max_expand_depth")]
    pub max_expand_depth: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            expand_threshold: default_expand_threshold(),
            max_expand_depth: default_max_expand_depth(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_expand_threshold() -> f32 {
    0.5
}
fn default_max_expand_depth() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct HybridConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_half")]
    pub bm25_weight: f64,
    #[serde(default = "default_half")]
    pub vector_weight: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { enabled: true, bm25_weight: 0.5, vector_weight: 0.5 }
    }
}

fn default_half() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecencyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recency_weight")]
    pub weight: f64,
    #[serde(default = "default_half_life")]
    pub half_life_days: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self { enabled: false, weight: 0.15, half_life_days: 30.0 }
    }
}

fn default_recency_weight() -> f64 {
    0.15
}
fn default_half_life() -> f64 {
    30.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { enabled: false, max_tokens: 512, overlap_tokens: 50 }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}
fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
        path: path.display().to_string(),
        message: format!("failed to read config file: {e}"),
    })?;

    let config: Config = serde_yaml::from_str(&content).map_err(|e| Error::Configuration {
        path: path.display().to_string(),
        message: format!("failed to parse YAML: {e}"),
    })?;

    validate(&config, path)?;
    Ok(config)
}

fn validate(config: &Config, path: &Path) -> Result<()> {
    let fail = |message: String| Error::Configuration { path: path.display().to_string(), message };

    if config.sources.is_empty() {
        return Err(fail("sources[] must contain at least one entry".to_string()));
    }
    if config.embedding.dimension == 0 {
        return Err(fail("embedding.dimension must be > 0".to_string()));
    }
    if config.chunking.enabled && config.chunking.max_tokens == 0 {
        return Err(fail("chunking.max_tokens must be > 0".to_string()));
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens && config.chunking.enabled {
        return Err(fail("chunking.overlap_tokens must be < chunking.max_tokens".to_string()));
    }
    if !(0.0..=1.0).contains(&config.graph.similarity_threshold) {
        return Err(fail("graph.similarity_threshold must be in [0,1]".to_string()));
    }
    if !(0.0..=1.0).contains(&config.graph.expand_threshold) {
        return Err(fail("graph.expand_threshold must be in [0,1]".to_string()));
    }
    if config.graph.max_expand_depth > 4 {
        return Err(fail("graph.max_expand_depth must be <= 4 (§5 resource limit)".to_string()));
    }
    Ok(())
}

/// Daemon-wide configuration (`~/.config/gundog/daemon.yaml`, §6.2).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { daemon: DaemonSection::default() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub serve_ui: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub indexes: HashMap<String, PathBuf>,
    #[serde(default)]
    pub default_index: Option<String>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            serve_ui: true,
            auth: AuthConfig::default(),
            cors: CorsConfig::default(),
            indexes: HashMap::new(),
            default_index: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7676
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AuthConfig {
    /// Resolves the effective key: `GUNDOG_API_KEY` env var overrides config.
    pub fn effective_key(&self) -> Option<String> {
        std::env::var("GUNDOG_API_KEY").ok().or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

pub fn load_daemon_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
        path: path.display().to_string(),
        message: format!("failed to read daemon config: {e}"),
    })?;
    serde_yaml::from_str(&content).map_err(|e| Error::Configuration {
        path: path.display().to_string(),
        message: format!("failed to parse daemon config YAML: {e}"),
    })
}

pub fn default_daemon_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gundog")
        .join("daemon.yaml")
}
