//! # Gundog
//!
//! **A local, single-machine semantic retrieval engine over heterogeneous
//! file corpora.**
//!
//! Gundog scans one or more filesystem sources, chunks and embeds their
//! content, and serves hybrid (vector + keyword) search with graph-based
//! expansion over a weighted document similarity graph — all from a single
//! long-running daemon process talking a small JSON-over-WebSocket
//! protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌───────────┐   ┌─────────────────────┐
//! │ Scanner  │──▶│ Chunk │──▶│ Embedder  │──▶│ VectorStore /        │
//! │ + ignore │   │       │   │ (+ BM25)  │   │ KeywordStore / Graph │
//! └──────────┘   └───────┘   └───────────┘   └──────────┬──────────┘
//!                                                        │
//!                                          ┌─────────────┴─────────────┐
//!                                          ▼                           ▼
//!                                   ┌─────────────┐             ┌─────────────┐
//!                                   │ IndexBuilder│             │ QueryEngine │
//!                                   │  (ingest)   │             │  (daemon)   │
//!                                   └─────────────┘             └─────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **Scanner** ([`scanner`]) walks each configured `Source`, applying
//!    glob/ignore-preset/`.gitignore` precedence, and skips binaries.
//! 2. The **Chunker** ([`chunk`]) splits changed documents into token
//!    windows (or treats each whole document as one chunk when chunking is
//!    disabled).
//! 3. The **Embedder** contract ([`embedding`]) maps chunk text to unit-norm
//!    vectors; this crate ships only the deterministic reference
//!    `HashingEmbedder`; a real model is an external dependency.
//! 4. The **IndexBuilder** ([`index_builder`]) orchestrates one ingest:
//!    scan → diff against the [`manifest`] → chunk/embed changed documents →
//!    upsert into the [`vector_store`] and [`keyword_store`] → delete
//!    removed documents → rebuild the [`graph_store`] → publish the
//!    manifest atomically.
//! 5. The **QueryEngine** ([`query_engine`]) embeds a query, fuses vector
//!    k-NN and BM25 candidates via the [`ranker`], optionally expands along
//!    the similarity graph, and assembles a graph payload.
//! 6. The **daemon** ([`daemon`]) exposes all of this over a WebSocket wire
//!    protocol ([`protocol`]) against a set of named indexes tracked by the
//!    [`registry`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML project/daemon configuration parsing and validation |
//! | [`models`] | Core data types flowing through ingest and query |
//! | [`error`] | Typed error taxonomy mapped onto wire error codes |
//! | [`scanner`] | Filesystem walk with glob/ignore-preset/gitignore precedence |
//! | [`chunk`] | Token-window chunker with line tracking |
//! | [`embedding`] | The `Embedder` contract, reference implementation, vector math |
//! | [`git_resolver`] | Opaque Git metadata lookups (commit time, web URL) |
//! | [`manifest`] | Per-index manifest and its atomic shadow-then-rename publish |
//! | [`vector_store`] | Dense-file and columnar-ANN vector backends |
//! | [`keyword_store`] | SQLite-backed BM25 postings |
//! | [`graph_store`] | Weighted document similarity graph and multi-source expansion |
//! | [`ranker`] | Reciprocal-rank-fusion hybrid scoring with recency boost |
//! | [`index_builder`] | Incremental ingest orchestration (the only writer) |
//! | [`query_engine`] | Single-query execution against an open index snapshot |
//! | [`registry`] | The daemon's index name → root map, persisted in daemon config |
//! | [`protocol`] | Wire request/response frame shapes |
//! | [`daemon`] | The WebSocket server tying registry + cache + query engine together |
//!
//! ## Configuration
//!
//! Gundog reads two YAML files: a per-index project config
//! (`.gundog/config.yaml`) and a daemon config
//! (`~/.config/gundog/daemon.yaml`). See [`config`] for all available
//! options and [`config::load_config`]/[`config::load_daemon_config`] for
//! validation rules.

pub mod chunk;
pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod git_resolver;
pub mod graph_store;
pub mod index_builder;
pub mod keyword_store;
pub mod manifest;
pub mod models;
pub mod protocol;
pub mod query_engine;
pub mod ranker;
pub mod registry;
pub mod scanner;
pub mod vector_store;
