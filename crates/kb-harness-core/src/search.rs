//! Hybrid lexical + semantic retrieval over an [`IndexStore`].
//!
//! # Scoring
//!
//! 1. Embed the query. If the embedder is unavailable, continue with the
//!    lexical signal only.
//! 2. On one snapshot, fetch `top_k × candidate_multiplier` lexical (BM25)
//!    and vector (cosine) candidates.
//! 3. Min-max normalize each list to `[0, 1]`.
//! 4. Merge: `combined = w_lex × lexical + w_sem × semantic`; a chunk missing
//!    from one list scores 0 on that side.
//! 5. Sort by combined (desc), ordinal (asc), source id, chunk id.
//! 6. Truncate to `top_k` and resolve the chunks on the same snapshot.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::store::{ChunkCandidate, IndexStore};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Weight of the normalized BM25 score.
    pub lexical_weight: f64,
    /// Weight of the normalized cosine score.
    pub semantic_weight: f64,
    /// Candidates fetched per signal, as a multiple of `top_k`.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            lexical_weight: 0.3,
            semantic_weight: 0.7,
            candidate_multiplier: 2,
        }
    }
}

/// A retrieved chunk with its scoring breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    pub chunk: Chunk,
    /// Normalized lexical score (0.0 if absent from lexical candidates).
    pub lexical_score: f64,
    /// Normalized semantic score (0.0 if absent from vector candidates).
    pub semantic_score: f64,
    pub combined_score: f64,
}

/// Runs hybrid queries against one store with one embedder.
pub struct Retriever<'a> {
    store: &'a dyn IndexStore,
    embedder: &'a dyn EmbeddingProvider,
    params: RetrievalParams,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a dyn IndexStore,
        embedder: &'a dyn EmbeddingProvider,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    /// Best `top_k` chunks across the whole index.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredResult>> {
        self.run(query, top_k, None).await
    }

    /// Best `top_k` chunks of a single source.
    pub async fn retrieve_from(
        &self,
        source_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        self.run(query, top_k, Some(source_id)).await
    }

    async fn run(
        &self,
        query: &str,
        top_k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ScoredResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        match self.ranked(query, top_k, source).await {
            Err(Error::NotInitialized(msg)) => {
                warn!("index is not initialised ({}); returning no results", msg);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn ranked(
        &self,
        query: &str,
        top_k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ScoredResult>> {
        let query_vec = match self.embedder.embed(query).await {
            Ok(v) => Some(v),
            Err(Error::EmbeddingUnavailable(msg)) => {
                warn!("embedding unavailable ({}); falling back to lexical search", msg);
                None
            }
            Err(e) => return Err(e),
        };

        let snapshot = self.store.snapshot().await?;
        let candidate_limit = top_k.saturating_mul(self.params.candidate_multiplier.max(1));

        let lexical = snapshot
            .lexical_search(query, candidate_limit, source)
            .await?;
        let vector = match &query_vec {
            Some(qv) => snapshot.vector_search(qv, candidate_limit, source).await?,
            None => Vec::new(),
        };
        debug!(
            lexical = lexical.len(),
            vector = vector.len(),
            candidate_limit,
            "retrieval candidates"
        );

        let merged = merge(&lexical, &vector, &self.params);

        let mut results = Vec::with_capacity(top_k.min(merged.len()));
        for m in merged.into_iter().take(top_k) {
            results.push(ScoredResult {
                chunk: snapshot.get_chunk(&m.candidate.chunk_id).await?,
                lexical_score: m.lexical,
                semantic_score: m.semantic,
                combined_score: m.combined,
            });
        }
        Ok(results)
    }
}

struct Merged<'c> {
    candidate: &'c ChunkCandidate,
    lexical: f64,
    semantic: f64,
    combined: f64,
}

/// Combine both candidate lists into one ranked list.
fn merge<'c>(
    lexical: &'c [ChunkCandidate],
    vector: &'c [ChunkCandidate],
    params: &RetrievalParams,
) -> Vec<Merged<'c>> {
    let mut by_id: HashMap<&str, Merged<'c>> = HashMap::new();

    for (c, score) in normalize_scores(lexical) {
        by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| Merged {
                candidate: c,
                lexical: 0.0,
                semantic: 0.0,
                combined: 0.0,
            })
            .lexical = score;
    }
    for (c, score) in normalize_scores(vector) {
        by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| Merged {
                candidate: c,
                lexical: 0.0,
                semantic: 0.0,
                combined: 0.0,
            })
            .semantic = score;
    }

    let mut merged: Vec<Merged<'c>> = by_id
        .into_values()
        .map(|mut m| {
            m.combined = params.lexical_weight * m.lexical + params.semantic_weight * m.semantic;
            m
        })
        .collect();

    merged.sort_by(|a, b| {
        b.combined
            .total_cmp(&a.combined)
            .then(a.candidate.ordinal.cmp(&b.candidate.ordinal))
            .then_with(|| a.candidate.source_id.cmp(&b.candidate.source_id))
            .then_with(|| a.candidate.chunk_id.cmp(&b.candidate.chunk_id))
    });
    merged
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal they normalize to `1.0`, unless the shared score
/// is itself zero, in which case they stay `0.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                if s_max.abs() < f64::EPSILON {
                    0.0
                } else {
                    1.0
                }
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, HashingProvider};
    use crate::store::memory::InMemoryStore;
    use crate::store::IndexSchema;
    use crate::sync::sync_document;

    fn make_candidate(chunk_id: &str, ordinal: i64, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            source_id: "doc".to_string(),
            ordinal,
            raw_score: score,
        }
    }

    fn hashing_store() -> InMemoryStore {
        let p = HashingProvider::default();
        InMemoryStore::new(IndexSchema::new(p.model_name(), p.dims()))
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![make_candidate("c1", 0, 5.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 0, 10.0),
            make_candidate("c2", 1, 5.0),
            make_candidate("c3", 2, 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal_zero() {
        let candidates = vec![make_candidate("c1", 0, 0.0), make_candidate("c2", 1, 0.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert_eq!(score, 0.0);
        }
    }

    #[test]
    fn test_merge_missing_side_counts_zero() {
        let lex = vec![make_candidate("a", 0, 4.0), make_candidate("b", 1, 2.0)];
        let vec = vec![make_candidate("c", 2, 0.9), make_candidate("b", 1, 0.5)];
        let merged = merge(&lex, &vec, &RetrievalParams::default());
        let order: Vec<(&str, f64)> = merged
            .iter()
            .map(|m| (m.candidate.chunk_id.as_str(), m.combined))
            .collect();
        // a: 0.3*1 + 0.7*0, b: 0.3*0 + 0.7*0, c: 0.7*1
        assert_eq!(order[0].0, "c");
        assert!((order[0].1 - 0.7).abs() < 1e-9);
        assert_eq!(order[1].0, "a");
        assert!((order[1].1 - 0.3).abs() < 1e-9);
        assert_eq!(order[2].0, "b");
    }

    #[test]
    fn test_merge_weights_select_signal() {
        let lex = vec![make_candidate("a", 0, 10.0), make_candidate("b", 1, 1.0)];
        let vec = vec![make_candidate("a", 0, 0.1), make_candidate("b", 1, 0.9)];

        let lexical_only = RetrievalParams {
            lexical_weight: 1.0,
            semantic_weight: 0.0,
            candidate_multiplier: 2,
        };
        let semantic_only = RetrievalParams {
            lexical_weight: 0.0,
            semantic_weight: 1.0,
            candidate_multiplier: 2,
        };
        assert_eq!(merge(&lex, &vec, &lexical_only)[0].candidate.chunk_id, "a");
        assert_eq!(merge(&lex, &vec, &semantic_only)[0].candidate.chunk_id, "b");
    }

    #[tokio::test]
    async fn test_dogs_paragraph_ranks_first() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = "Para one about cats.\n\nPara two about dogs.\n\nPara three about birds.";
        assert_eq!(sync_document(&store, &embedder, "doc", text, 800).await.unwrap(), 3);

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        let results = retriever.retrieve("dogs", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.text, "Para two about dogs.");
        assert_eq!(results[0].chunk.ordinal, 1);
        assert!((results[0].combined_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sentences_split_when_bound_is_tight() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = "Para one about cats. Para two about dogs.\n\nPara three about birds.";
        assert_eq!(sync_document(&store, &embedder, "doc", text, 25).await.unwrap(), 3);

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        let results = retriever.retrieve("dogs", 1).await.unwrap();
        assert_eq!(results[0].chunk.text, "Para two about dogs.");
    }

    #[tokio::test]
    async fn test_empty_document_retrieves_nothing() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        assert_eq!(sync_document(&store, &embedder, "doc", "", 800).await.unwrap(), 0);

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_top_k() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        sync_document(&store, &embedder, "doc", "some text", 800).await.unwrap();

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        assert!(retriever.retrieve("   ", 5).await.unwrap().is_empty());
        assert!(retriever.retrieve("text", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_ordered_by_ordinal() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = "Same text.\n\nSame text.\n\nSame text.";
        sync_document(&store, &embedder, "doc", text, 800).await.unwrap();

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        for _ in 0..3 {
            let results = retriever.retrieve("same", 3).await.unwrap();
            let ordinals: Vec<i64> = results.iter().map(|r| r.chunk.ordinal).collect();
            assert_eq!(ordinals, vec![0, 1, 2]);
            assert!(results.windows(2).all(|w| w[0].combined_score == w[1].combined_score));
        }
    }

    #[tokio::test]
    async fn test_retrieval_deterministic() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = "Cats purr softly.\n\nDogs bark at cats.\n\nBirds sing.\n\nDogs fetch sticks.";
        sync_document(&store, &embedder, "doc", text, 800).await.unwrap();

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        let ids = |rs: Vec<ScoredResult>| rs.into_iter().map(|r| r.chunk.id).collect::<Vec<_>>();
        let first = ids(retriever.retrieve("dogs and cats", 4).await.unwrap());
        let second = ids(retriever.retrieve("dogs and cats", 4).await.unwrap());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_lexical_fallback_when_embedder_unavailable() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = "Para one about cats.\n\nPara two about dogs.";
        sync_document(&store, &embedder, "doc", text, 800).await.unwrap();

        let retriever = Retriever::new(&store, &DisabledProvider, RetrievalParams::default());
        let results = retriever.retrieve("dogs", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.ordinal, 1);
        assert_eq!(results[0].semantic_score, 0.0);
        assert!((results[0].combined_score - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retrieve_from_single_source() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        sync_document(&store, &embedder, "a", "dogs in a", 800).await.unwrap();
        sync_document(&store, &embedder, "b", "dogs in b", 800).await.unwrap();

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        let results = retriever.retrieve_from("b", "dogs", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_id, "b");

        let both = retriever.retrieve("dogs", 5).await.unwrap();
        let sources: Vec<&str> = both.iter().map(|r| r.chunk.source_id.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let store = hashing_store();
        let embedder = HashingProvider::default();
        let text = (0..10).map(|i| format!("Note {} about dogs.", i)).collect::<Vec<_>>().join("\n\n");
        sync_document(&store, &embedder, "doc", &text, 800).await.unwrap();

        let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
        assert_eq!(retriever.retrieve("dogs", 3).await.unwrap().len(), 3);
    }
}
