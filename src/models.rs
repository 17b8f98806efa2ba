//! Core data types flowing through the ingest and query pipelines.
//!
//! Mirrors the data model: `Source` → scanned `ScannedFile` → `Chunk`
//! (or a whole-document chunk when chunking is off) → `Vector` → postings
//! and graph `Edge`s, all tied together by the `Manifest`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// A configured ingestion root (`sources[]` in `config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub path: PathBuf,
    #[serde(default)]
    pub glob: Vec<String>,
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub ignore_preset: Option<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
}

/// A file found by the Scanner, before chunking/embedding.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub type_: Option<String>,
    pub mtime: i64,
    pub size: u64,
}

/// A document as recorded in the manifest's file map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub content_hash: String,
    pub mtime: i64,
    pub size: u64,
    pub doc_id: String,
    #[serde(default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub git_last_commit_time: Option<i64>,
    /// Number of chunks currently stored for this document (1 when chunking
    /// is disabled). Lets the builder enumerate `chunk_id(doc_id, 0..n)`
    /// without re-chunking unchanged files just to rebuild the graph.
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
}

fn default_chunk_count() -> usize {
    1
}

/// The unit indexed when chunking is on (one per document, one per window
/// when chunking is off and the "document" is treated as a single chunk).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub content_hash: String,
    pub text: String,
}

/// A dense vector keyed by doc_id or chunk_id, always L2-normalized once
/// stored (I1).
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
}

/// An input to the keyword store: an id paired with its raw text.
#[derive(Debug, Clone)]
pub struct PostingInput {
    pub id: String,
    pub text: String,
}

/// An undirected weighted edge between two document ids, `a < b`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub a: String,
    pub b: String,
    pub weight: f32,
}

impl Edge {
    pub fn new(x: &str, y: &str, weight: f32) -> Self {
        if x <= y {
            Edge { a: x.to_string(), b: y.to_string(), weight }
        } else {
            Edge { a: y.to_string(), b: x.to_string(), weight }
        }
    }
}

/// One hop of a graph expansion result (§4.6).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpandedNode {
    pub id: String,
    pub via: String,
    pub weight: f32,
    pub depth: u32,
}

/// A single ranked hit returned by the HybridRanker (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub id: String,
    pub doc_id: String,
    pub path: String,
    pub fused: f64,
    pub display: f64,
    pub raw_cosine: f32,
}

/// Stable content hash used everywhere ids are derived deterministically.
pub fn stable_hash(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn chunk_id(doc_id: &str, chunk_index: i64) -> String {
    format!("{doc_id}:{chunk_index}")
}

/// Recovers the owning doc_id from an id that may be a bare doc_id (chunking
/// off) or a `doc_id:chunk_index` chunk_id (chunking on).
pub fn doc_id_of(id: &str, chunking_enabled: bool) -> &str {
    if chunking_enabled {
        id.rsplit_once(':').map(|(doc, _)| doc).unwrap_or(id)
    } else {
        id
    }
}
