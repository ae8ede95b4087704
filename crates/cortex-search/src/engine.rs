//! Ties the ranking pipeline, RRF, and collaborator fallbacks together
//! into one callable search surface.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use cortex_core::collab::EmbeddingProvider;
use cortex_core::error::Result;
use cortex_core::store::Store;
use tracing::warn;

use crate::options::{Options, SearchHit, SearchMode};
use crate::ranking;
use crate::rrf::{self, RankedList};

const HYBRID_ALPHA: f64 = 0.5;

pub struct SearchEngine {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { store, embedder }
    }

    pub async fn search(&self, query: &str, opts: &Options) -> Result<Vec<SearchHit>> {
        let candidate_limit = (opts.limit * 5).max(50);

        let (base_scores, match_type) = self.base_search(query, opts.mode, candidate_limit).await?;

        let now = Utc::now();
        let mut scored = Vec::with_capacity(base_scores.len());
        for (memory_id, base_score) in base_scores {
            let Some(memory) = self.store.get_memory(memory_id).await? else { continue };
            if !ranking::passes_filters(&memory, base_score, opts) {
                continue;
            }

            let mut score = base_score;
            let mut explain = Vec::new();
            if opts.explain {
                explain.push(format!("base({match_type})={base_score:.4}"));
            }

            let metadata_factor = ranking::metadata_boost(&memory, opts);
            score *= metadata_factor;
            if opts.explain && metadata_factor != 1.0 {
                explain.push(format!("metadata_boost×{metadata_factor:.2}"));
            }

            if !opts.disable_recency {
                let factor = ranking::recency_factor(&memory, now);
                score *= factor;
                if opts.explain {
                    explain.push(format!("recency×{factor:.2}"));
                }
            }

            if !opts.disable_source_weight {
                let factor = ranking::source_weight_factor(&memory);
                score *= factor;
                if opts.explain {
                    explain.push(format!("source_weight×{factor:.2}"));
                }
            }

            let mut hit_match_type = match_type.to_string();
            if !opts.disable_confidence_decay {
                let facts = self.store.facts_for_memory(memory_id).await?;
                let (factor, stale) = ranking::confidence_decay_factor(&facts, now);
                score *= factor;
                if opts.explain {
                    explain.push(format!("confidence_decay×{factor:.2}"));
                }
                if stale {
                    hit_match_type = format!("{hit_match_type}:stale");
                }
            }

            scored.push(SearchHit { memory_id, score, match_type: hit_match_type, explain });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.memory_id.cmp(&b.memory_id)));
        scored.truncate(opts.limit);
        Ok(scored)
    }

    async fn base_search(&self, query: &str, mode: SearchMode, candidate_limit: usize) -> Result<(Vec<(i64, f64)>, &'static str)> {
        match mode {
            SearchMode::Keyword => Ok((self.bm25_candidates(query, candidate_limit).await?, "bm25")),
            SearchMode::Semantic => {
                let Some(candidates) = self.semantic_candidates(query, candidate_limit).await? else {
                    warn!("no embedder configured, degrading semantic search to bm25");
                    return Ok((self.bm25_candidates(query, candidate_limit).await?, "bm25"));
                };
                Ok((candidates, "semantic"))
            }
            SearchMode::Hybrid => {
                let bm25 = self.bm25_candidates(query, candidate_limit).await?;
                let Some(semantic) = self.semantic_candidates(query, candidate_limit).await? else {
                    warn!("no embedder configured, degrading hybrid search to bm25");
                    return Ok((bm25, "bm25"));
                };
                Ok((combine_hybrid(&bm25, &semantic), "hybrid"))
            }
            SearchMode::Rrf => {
                let bm25 = self.bm25_candidates(query, candidate_limit).await?;
                let Some(semantic) = self.semantic_candidates(query, candidate_limit).await? else {
                    warn!("no embedder configured, degrading rrf search to bm25");
                    return Ok((bm25, "bm25"));
                };
                let bm25_ids: Vec<i64> = ranked_ids(&bm25);
                let semantic_ids: Vec<i64> = ranked_ids(&semantic);
                let fused = rrf::fuse(&[
                    RankedList { ids: &bm25_ids, weight: 1.0 },
                    RankedList { ids: &semantic_ids, weight: 1.0 },
                ]);
                Ok((fused, "rrf"))
            }
        }
    }

    async fn bm25_candidates(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>> {
        let hits = self.store.search_fts(query, limit).await?;
        Ok(hits.into_iter().map(|hit| (hit.memory_id, ranking::normalize_bm25(hit.rank))).collect())
    }

    /// `None` when no embedder is configured, the trigger for graceful
    /// degradation to BM25.
    async fn semantic_candidates(&self, query: &str, limit: usize) -> Result<Option<Vec<(i64, f64)>>> {
        let Some(embedder) = &self.embedder else { return Ok(None) };
        let query_vectors = embedder.embed(&[query.to_string()]).await?;
        let Some(query_vector) = query_vectors.into_iter().next() else { return Ok(Some(Vec::new())) };

        let mut scored: Vec<(i64, f64)> = self
            .store
            .all_embeddings()
            .await?
            .into_iter()
            .map(|(id, vector)| (id, ranking::normalize_semantic(ranking::cosine_similarity(&query_vector, &vector))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(Some(scored))
    }
}

fn ranked_ids(scored: &[(i64, f64)]) -> Vec<i64> {
    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    sorted.into_iter().map(|(id, _)| id).collect()
}

/// Max-normalizes each score stream into `[0, 1]` before blending.
fn combine_hybrid(bm25: &[(i64, f64)], semantic: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let bm25_max = bm25.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max).max(f64::MIN_POSITIVE);
    let semantic_max = semantic.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max).max(f64::MIN_POSITIVE);

    let bm25_norm: HashMap<i64, f64> = bm25.iter().map(|(id, s)| (*id, s / bm25_max)).collect();
    let semantic_norm: HashMap<i64, f64> = semantic.iter().map(|(id, s)| (*id, s / semantic_max)).collect();

    let mut ids: Vec<i64> = bm25_norm.keys().chain(semantic_norm.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    ids.into_iter()
        .map(|id| {
            let b = bm25_norm.get(&id).copied().unwrap_or(0.0);
            let s = semantic_norm.get(&id).copied().unwrap_or(0.0);
            (id, HYBRID_ALPHA * b + (1.0 - HYBRID_ALPHA) * s)
        })
        .collect()
}
