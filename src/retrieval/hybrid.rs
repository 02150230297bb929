//! Hybrid ranker: parallel vector and lexical retrieval with fused scores
//!
//! Each query overfetches 2k candidates per path, merges them by chunk
//! key, fuses scores by weighted sum, and truncates to k. Ties in the
//! combined score keep first-seen merge order: vector-path candidates
//! enter the merge first in rank order, then lexical-path candidates.

use std::sync::Arc;

use ahash::AHashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::corpus::{ChunkKey, ChunkRecord};
use crate::index::{LexicalIndex, VectorStore};

use super::fusion::FusionWeights;
use super::SearchError;

/// Candidate multiplier for the base search
const OVERFETCH: usize = 2;
/// Candidate multiplier applied before metadata filtering
const FILTER_OVERFETCH: usize = 3;

/// One fused search result
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub chunk: ChunkRecord,
    /// Weighted sum of the two path scores
    pub score: f32,
    pub vector_score: f32,
    pub keyword_score: f32,
}

/// Equality filters over chunk fields
///
/// Chunk records carry a fixed field set, so filters address fields by
/// name at parse time; a filter naming an unknown field is rejected
/// rather than silently passing.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source: Option<String>,
    pub section: Option<String>,
    pub candidate: Option<String>,
}

impl SearchFilters {
    /// Parse `field=value` pairs; unknown field names are an error
    pub fn parse(pairs: &[String]) -> Result<Self, SearchError> {
        let mut filters = SearchFilters::default();
        for pair in pairs {
            let Some((field, value)) = pair.split_once('=') else {
                return Err(SearchError::InvalidParams(format!(
                    "filter '{}' is not of the form field=value",
                    pair
                )));
            };
            match field {
                "source" => filters.source = Some(value.to_string()),
                "section" => filters.section = Some(value.to_string()),
                "candidate" => filters.candidate = Some(value.to_string()),
                other => {
                    return Err(SearchError::InvalidParams(format!(
                        "unknown filter field '{}' (expected source, section, or candidate)",
                        other
                    )))
                }
            }
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.section.is_none() && self.candidate.is_none()
    }

    /// Every present filter must match exactly
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        if let Some(source) = &self.source {
            if &chunk.source_id != source {
                return false;
            }
        }
        if let Some(section) = &self.section {
            if &chunk.section != section {
                return false;
            }
        }
        if let Some(candidate) = &self.candidate {
            if &chunk.candidate != candidate {
                return false;
            }
        }
        true
    }
}

struct Candidate {
    chunk: ChunkRecord,
    vector_score: f32,
    keyword_score: f32,
}

/// Fused retrieval over the vector and lexical indexes
pub struct HybridRanker {
    vector: Arc<RwLock<VectorStore>>,
    lexical: Arc<RwLock<LexicalIndex>>,
    weights: FusionWeights,
}

impl HybridRanker {
    pub fn new(
        vector: Arc<RwLock<VectorStore>>,
        lexical: Arc<RwLock<LexicalIndex>>,
        weights: FusionWeights,
    ) -> Self {
        Self {
            vector,
            lexical,
            weights,
        }
    }

    /// Top-k fused results for a query
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedResult>, SearchError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let fetch = k.saturating_mul(OVERFETCH);

        let (vector_hits, lexical_top) = tokio::join!(
            async {
                let mut store = self.vector.write().await;
                store.search(query, fetch).await
            },
            async {
                let lexical = self.lexical.read().await;
                let scores = lexical.normalized_scores(query);
                let mut indices: Vec<usize> = (0..scores.len()).collect();
                indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
                indices.truncate(fetch);
                indices
                    .into_iter()
                    .map(|i| (lexical.chunks()[i].clone(), scores[i]))
                    .collect::<Vec<_>>()
            }
        );
        let vector_hits = vector_hits?;

        debug!(
            vector = vector_hits.len(),
            lexical = lexical_top.len(),
            "Merging retrieval paths"
        );

        // merge by chunk key; a candidate seen by both paths appears once
        // with both score components
        let mut order: Vec<Candidate> = Vec::new();
        let mut by_key: AHashMap<ChunkKey, usize> = AHashMap::new();

        for hit in vector_hits {
            let key = hit.chunk.key();
            if by_key.contains_key(&key) {
                continue;
            }
            by_key.insert(key, order.len());
            order.push(Candidate {
                chunk: hit.chunk,
                vector_score: hit.similarity,
                keyword_score: 0.0,
            });
        }
        for (chunk, score) in lexical_top {
            match by_key.get(&chunk.key()) {
                Some(&at) => order[at].keyword_score = score,
                None => {
                    by_key.insert(chunk.key(), order.len());
                    order.push(Candidate {
                        chunk,
                        vector_score: 0.0,
                        keyword_score: score,
                    });
                }
            }
        }

        let mut results: Vec<RankedResult> = order
            .into_iter()
            .map(|c| RankedResult {
                score: self.weights.combine(c.vector_score, c.keyword_score),
                chunk: c.chunk,
                vector_score: c.vector_score,
                keyword_score: c.keyword_score,
            })
            .collect();
        // stable sort: equal scores keep first-seen merge order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    /// Top-k results matching all supplied field filters.
    ///
    /// Overfetches 3k from the base search, then filters. Matches beyond
    /// the overfetch window are lost, so fewer than k results can come
    /// back even when the corpus holds more; that window is the documented
    /// cost of filtering after fusion.
    pub async fn search_with_filter(
        &self,
        query: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<RankedResult>, SearchError> {
        if filters.is_empty() {
            return self.search(query, k).await;
        }

        let mut results = self
            .search(query, k.saturating_mul(FILTER_OVERFETCH))
            .await?;
        results.retain(|r| filters.matches(&r.chunk));
        results.truncate(k);
        Ok(results)
    }
}
