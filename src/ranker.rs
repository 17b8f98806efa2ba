//! HybridRanker (§4.8): fuses vector kNN and BM25 candidate lists via
//! Reciprocal Rank Fusion, applies an optional recency boost, collapses
//! chunk-level hits down to one winner per document, rescales the result to
//! `[0, 1]`, and gates obviously irrelevant queries to an empty list.

use std::collections::HashMap;

use crate::config::{HybridConfig, RecencyConfig};
use crate::embedding::cosine;
use crate::error::Result;
use crate::keyword_store::KeywordStore;
use crate::manifest::Manifest;
use crate::models::{doc_id_of, RankedHit};
use crate::vector_store::VectorStore;

/// Fixed per §4.8 step 3 and §9 — retained as an implementation constant
/// rather than a user knob until evidence warrants exposing it.
const RRF_K: f64 = 60.0;

/// Irrelevance gate floors (§4.8 step 7, §9 open question): not pinned by
/// the source, kept as implementation constants pending recall measurements.
const IRRELEVANCE_COSINE_FLOOR: f32 = 0.25;
const IRRELEVANCE_BM25_FLOOR: f32 = 0.5;

pub struct RankerInput<'a> {
    pub hybrid: &'a HybridConfig,
    pub recency: &'a RecencyConfig,
    pub chunking_enabled: bool,
    /// Unix epoch seconds; passed in rather than read from the clock so
    /// ranking stays deterministic and testable (P1).
    pub now: i64,
}

/// Runs the full fusion pipeline (§4.8) and returns up to `top_k` hits,
/// already deduped to one per document and rescaled to `[0, 1]` display
/// scores. Returns an empty list when the irrelevance gate trips.
pub async fn rank(
    vector_store: &VectorStore,
    keyword_store: &KeywordStore,
    manifest: &Manifest,
    query_vec: &[f32],
    query_text: &str,
    top_k: usize,
    input: RankerInput<'_>,
) -> Result<Vec<RankedHit>> {
    let k_raw = (top_k.saturating_mul(4)).max(50);
    let vector_hits = vector_store.knn(query_vec, k_raw, None).await?;
    let keyword_hits = keyword_store.search(query_text, k_raw).await?;

    let best_cosine = vector_hits.first().map(|(_, s)| *s).unwrap_or(f32::NEG_INFINITY);
    let best_bm25 = keyword_hits.first().map(|(_, s)| *s).unwrap_or(f32::NEG_INFINITY);
    if best_cosine < IRRELEVANCE_COSINE_FLOOR && best_bm25 < IRRELEVANCE_BM25_FLOOR {
        return Ok(Vec::new());
    }

    let vector_rank: HashMap<&str, usize> =
        vector_hits.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();
    let keyword_rank: HashMap<&str, usize> =
        keyword_hits.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();
    let vector_cosine: HashMap<&str, f32> = vector_hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let mut ids: Vec<&str> =
        vector_hits.iter().map(|(id, _)| id.as_str()).chain(keyword_hits.iter().map(|(id, _)| id.as_str())).collect();
    ids.sort_unstable();
    ids.dedup();

    // Reverse index from doc_id to its manifest entry, built once rather
    // than scanning `manifest.files` per candidate.
    let by_doc_id: HashMap<&str, (&str, &crate::models::FileEntry)> =
        manifest.files.iter().map(|(path, entry)| (entry.doc_id.as_str(), (path.as_str(), entry))).collect();

    let mut fused: HashMap<String, f64> = HashMap::with_capacity(ids.len());
    let mut raw_cosine: HashMap<String, f32> = HashMap::with_capacity(ids.len());

    for id in &ids {
        let rv = vector_rank.get(id).copied().map(|r| r as f64).unwrap_or(f64::INFINITY);
        let rk = keyword_rank.get(id).copied().map(|r| r as f64).unwrap_or(f64::INFINITY);
        let rrf = input.hybrid.vector_weight * (1.0 / (RRF_K + rv)) + input.hybrid.bm25_weight * (1.0 / (RRF_K + rk));

        let doc_id = doc_id_of(id, input.chunking_enabled);
        let mut score = rrf;
        if input.recency.enabled {
            if let Some((_, entry)) = by_doc_id.get(doc_id) {
                if let Some(commit_time) = entry.git_last_commit_time {
                    let age_days = ((input.now - commit_time) as f64 / 86_400.0).max(0.0);
                    let boost = input.recency.weight
                        * (-std::f64::consts::LN_2 * age_days / input.recency.half_life_days.max(1e-6)).exp();
                    score *= 1.0 + boost;
                }
            }
        }
        fused.insert(id.to_string(), score);

        let cosine_for_id = match vector_cosine.get(id) {
            Some(c) => *c,
            None => match vector_store.get(id).await? {
                Some(stored) => cosine(query_vec, &stored),
                None => f32::NEG_INFINITY,
            },
        };
        raw_cosine.insert(id.to_string(), cosine_for_id);
    }

    // Chunk→file dedup (§4.8 step 5): keep the highest-fused id per doc_id.
    let mut best_per_doc: HashMap<String, (String, f64)> = HashMap::new();
    for (id, score) in &fused {
        let doc_id = doc_id_of(id, input.chunking_enabled).to_string();
        best_per_doc
            .entry(doc_id)
            .and_modify(|existing| {
                if *score > existing.1 {
                    *existing = (id.clone(), *score);
                }
            })
            .or_insert_with(|| (id.clone(), *score));
    }

    let mut ranked: Vec<(String, String, f64)> =
        best_per_doc.into_iter().map(|(doc_id, (id, score))| (doc_id, id, score)).collect();
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
    ranked.truncate(top_k);

    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    // Rescale to [0,1] (§4.8 step 6).
    let s_max = ranked[0].2;
    let s_floor = ranked[ranked.len() - 1].2;
    let spread = s_max - s_floor;

    let mut out = Vec::with_capacity(ranked.len());
    for (i, (doc_id, id, score)) in ranked.into_iter().enumerate() {
        let display = if spread <= 1e-9 {
            if i == 0 {
                1.0
            } else {
                0.0
            }
        } else {
            ((score - s_floor) / spread).clamp(0.0, 1.0)
        };
        let path = by_doc_id.get(doc_id.as_str()).map(|(path, _)| path.to_string()).unwrap_or_default();
        let cosine_value = raw_cosine.get(&id).copied().unwrap_or(f32::NEG_INFINITY);

        out.push(RankedHit { id, doc_id, path, fused: score, display, raw_cosine: cosine_value });
    }
    Ok(out)
}
