//! QueryEngine (§4.9): resolves an already-loaded index snapshot, embeds the
//! query text, fuses vector + keyword candidates via the `HybridRanker`,
//! optionally expands along the similarity graph, and assembles the induced
//! graph payload the wire protocol returns alongside the ranked hits.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, StorageBackend};
use crate::embedding::{normalize, Embedder};
use crate::error::{Error, Result};
use crate::graph_store::GraphStore;
use crate::keyword_store::KeywordStore;
use crate::manifest::Manifest;
use crate::models::{Edge, ExpandedNode, RankedHit};
use crate::ranker::{self, RankerInput};
use crate::vector_store::VectorStore;

/// An opened, query-ready snapshot of one index (I5): the manifest is loaded
/// once at open time and never mutated, so every query issued against this
/// handle observes the same consistent state regardless of what a concurrent
/// ingest later publishes (P8). The daemon's loaded-index cache swaps this
/// whole struct for a fresh one after each successful ingest rather than
/// mutating it in place.
pub struct LoadedIndex {
    pub root: PathBuf,
    pub config: Config,
    pub manifest: Manifest,
    pub vector_store: VectorStore,
    pub keyword_store: KeywordStore,
    pub graph_store: GraphStore,
    pub embedder: Arc<dyn Embedder>,
}

impl LoadedIndex {
    /// Opens the stores for `root` against a manifest that must already
    /// exist and must agree with `embedder`'s identity (§3 "A load that
    /// encounters a manifest whose model identifier or dimension differs...
    /// MUST refuse"). Callers run an ingest first if no manifest exists yet.
    pub async fn open(root: PathBuf, config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let manifest_path = root.join("manifest.json");
        let manifest = Manifest::load(&manifest_path)?
            .ok_or_else(|| Error::IndexNotFound(format!("no manifest at {}", manifest_path.display())))?;
        manifest.check_compatible(&embedder.identifier(), embedder.dimension(), config.storage.backend)?;

        let vector_path = match config.storage.backend {
            StorageBackend::DenseFile => root.join("vectors.bin"),
            StorageBackend::ColumnarAnn => root.join("columnar"),
        };
        let vector_store = VectorStore::open(config.storage.backend, &vector_path, embedder.dimension()).await?;
        let keyword_store = KeywordStore::open(&root.join("keywords.db")).await?;
        let graph_store = GraphStore::open(&root.join("graph.bin"))?;

        Ok(Self { root, config, manifest, vector_store, keyword_store, graph_store, embedder })
    }
}

/// A node in the assembled graph payload: just enough to let a client render
/// the expansion without a second round trip to resolve paths.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub direct: Vec<RankedHit>,
    pub related: Vec<ExpandedNode>,
    pub graph: GraphPayload,
}

pub struct QueryRequest<'a> {
    pub text: &'a str,
    pub top_k: usize,
    pub expand: bool,
    pub expand_depth: Option<u32>,
    pub min_score: Option<f32>,
}

/// Result-cap ceiling (§5): callers asking for more are silently clamped
/// rather than rejected, matching how `expand_depth` is clamped below.
const MAX_TOP_K: usize = 200;
const MAX_EXPAND_DEPTH: u32 = 4;

/// Runs one query end to end against an already-open index snapshot (§4.9
/// steps 2-6). Index resolution (`INDEX_NOT_FOUND`/`INDEX_BUSY`) happens one
/// layer up, in the daemon, since it requires the registry and the
/// loaded-index cache this function doesn't own.
pub async fn query(index: &LoadedIndex, req: QueryRequest<'_>, now: i64) -> Result<QueryResult> {
    if req.text.trim().is_empty() {
        return Err(Error::InvalidRequest("query text must not be empty".to_string()));
    }
    let top_k = req.top_k.clamp(1, MAX_TOP_K);

    let mut query_vec = index
        .embedder
        .embed_batch(&[req.text.to_string()])
        .await
        .map_err(|e| Error::EmbedFailed(e.to_string()))?
        .remove(0);
    normalize(&mut query_vec);

    let direct_all = ranker::rank(
        &index.vector_store,
        &index.keyword_store,
        &index.manifest,
        &query_vec,
        req.text,
        top_k,
        RankerInput {
            hybrid: &index.config.hybrid,
            recency: &index.config.recency,
            chunking_enabled: index.config.chunking.enabled,
            now,
        },
    )
    .await?;

    // §4.9 steps 4-5 run against the unfiltered `direct_all[]`: expansion
    // seeds and the assembled graph payload must not shrink when a caller
    // passes `min_score`. The filter applies only to the final `direct`
    // field returned to the caller (step 6), by raw cosine, not the
    // rescaled display score.
    let mut related: Vec<ExpandedNode> = Vec::new();
    if req.expand && !direct_all.is_empty() {
        let depth = req.expand_depth.unwrap_or(index.config.graph.max_expand_depth).clamp(1, MAX_EXPAND_DEPTH);
        let seeds: Vec<String> = direct_all.iter().map(|h| h.doc_id.clone()).collect();
        related = index.graph_store.expand(&seeds, index.config.graph.expand_threshold, depth);
    }

    let mut node_ids: HashSet<&str> = direct_all.iter().map(|h| h.doc_id.as_str()).collect();
    node_ids.extend(related.iter().map(|n| n.id.as_str()));

    let path_by_doc_id: HashMap<&str, &str> =
        index.manifest.files.iter().map(|(path, entry)| (entry.doc_id.as_str(), path.as_str())).collect();

    let mut nodes: Vec<GraphNode> = node_ids
        .iter()
        .map(|id| GraphNode { id: id.to_string(), path: path_by_doc_id.get(id).map(|p| p.to_string()).unwrap_or_default() })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let edges = index.graph_store.edges_among(&node_ids);

    let min_score = req.min_score.unwrap_or(f32::NEG_INFINITY);
    let direct: Vec<RankedHit> = direct_all.into_iter().filter(|h| h.raw_cosine >= min_score).collect();

    Ok(QueryResult { direct, related, graph: GraphPayload { nodes, edges } })
}
