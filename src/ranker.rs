//! Hybrid ranking: lexical scores for every record, plus a blended vector
//! similarity for the nearest candidates when an embedding provider and a
//! readable index are available.
//!
//! The vector path is optional. When it is disabled, unavailable, or fails for
//! a query, every record's combined score is exactly its lexical score and
//! [`RankedResults::vector_search_used`] is false. Ranking itself never fails.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RankingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::SagaError;
use crate::index::VectorIndex;
use crate::lexical::{tie_break, LexicalBreakdown, LexicalScorer};
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub record_id: String,
    pub title: String,
    pub lexical_score: f64,
    /// Cosine similarity in [-1, 1]; `None` if the record was not a vector
    /// candidate for this query.
    pub vector_score: Option<f32>,
    pub combined_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<LexicalBreakdown>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedResults {
    pub results: Vec<RankedResult>,
    pub vector_search_used: bool,
    /// Why the vector path was skipped, when it was configured but not used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Records whose stored vector predates their current content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stale_ids: Vec<String>,
}

impl RankedResults {
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.record_id.as_str()).collect()
    }
}

/// Blending constants for the vector term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridParams {
    pub vector_weight: f64,
    pub vector_scale: f64,
    pub candidate_multiplier: usize,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self::from(&RankingConfig::default())
    }
}

impl From<&RankingConfig> for HybridParams {
    fn from(config: &RankingConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            vector_scale: config.vector_scale,
            candidate_multiplier: config.candidate_multiplier,
        }
    }
}

impl HybridParams {
    /// Map a similarity in [-1, 1] onto `[0, 2 * vector_scale]`. A NaN
    /// similarity contributes nothing.
    pub fn normalize(&self, similarity: f32) -> f64 {
        if similarity.is_nan() {
            return 0.0;
        }
        (f64::from(similarity.clamp(-1.0, 1.0)) + 1.0) * self.vector_scale
    }
}

/// Where query vectors come from, if anywhere.
#[derive(Clone, Copy)]
pub enum VectorPath<'a> {
    /// No provider configured; pure lexical ranking.
    Disabled,
    /// A provider is configured but the index cannot be used. The reason is
    /// reported as the fallback reason.
    Unavailable(&'a str),
    Ready {
        provider: &'a dyn EmbeddingProvider,
        index: &'a VectorIndex,
    },
}

pub struct HybridRanker<'a> {
    lexical: LexicalScorer,
    params: HybridParams,
    vectors: VectorPath<'a>,
    explain: bool,
}

impl<'a> HybridRanker<'a> {
    pub fn new(lexical: LexicalScorer, params: HybridParams) -> Self {
        Self {
            lexical,
            params,
            vectors: VectorPath::Disabled,
            explain: false,
        }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(LexicalScorer::new(config.lexical.clone()), HybridParams::from(config))
    }

    pub fn with_vectors(self, provider: &'a dyn EmbeddingProvider, index: &'a VectorIndex) -> Self {
        self.with_vector_path(VectorPath::Ready { provider, index })
    }

    pub fn with_vector_path(mut self, vectors: VectorPath<'a>) -> Self {
        self.vectors = vectors;
        self
    }

    /// Attach the per-factor lexical breakdown to every result.
    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn lexical(&self) -> &LexicalScorer {
        &self.lexical
    }

    /// Rank `records` for `query`, embedding the query synchronously if the
    /// vector path is ready. Returns at most `k` results.
    pub fn rank(&self, query: &str, records: &[Record], k: usize) -> RankedResults {
        let embedding = match self.vectors {
            VectorPath::Ready { provider, .. } if !query.trim().is_empty() => Some(
                provider
                    .embed(query)
                    .map_err(|e| SagaError::ProviderUnavailable(e.to_string())),
            ),
            _ => None,
        };
        self.rank_inner(query, records, k, embedding)
    }

    /// Rank with a query embedding computed by the caller (typically via
    /// [`crate::embedding::embed_query`] under a timeout). An `Err` means the
    /// provider was unavailable for this query and ranking falls back to
    /// lexical scores.
    pub fn rank_with_query_embedding(
        &self,
        query: &str,
        records: &[Record],
        k: usize,
        embedding: Result<Vec<f32>, SagaError>,
    ) -> RankedResults {
        self.rank_inner(query, records, k, Some(embedding))
    }

    fn rank_inner(
        &self,
        query: &str,
        records: &[Record],
        k: usize,
        embedding: Option<Result<Vec<f32>, SagaError>>,
    ) -> RankedResults {
        if query.trim().is_empty() || k == 0 || records.is_empty() {
            return RankedResults::default();
        }

        let breakdowns = self.lexical.explain_all(query, records);
        let mut outcome = RankedResults::default();
        let similarities = self.vector_similarities(records, k, embedding, &mut outcome);

        let mut scored: Vec<(usize, RankedResult)> = records
            .iter()
            .zip(breakdowns)
            .enumerate()
            .map(|(pos, (record, breakdown))| {
                let lexical_score = breakdown.total();
                let vector_score = similarities.get(record.id()).copied();
                let combined_score = match vector_score {
                    Some(sim) => lexical_score + self.params.vector_weight * self.params.normalize(sim),
                    None => lexical_score,
                };
                let result = RankedResult {
                    record_id: record.id().to_string(),
                    title: record.title().to_string(),
                    lexical_score,
                    vector_score,
                    combined_score,
                    breakdown: self.explain.then_some(breakdown),
                };
                (pos, result)
            })
            .collect();

        scored.sort_by(|(pa, a), (pb, b)| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| tie_break(&records[*pa], &records[*pb]))
        });
        scored.truncate(k);
        outcome.results = scored.into_iter().map(|(_, r)| r).collect();

        debug!(
            query,
            results = outcome.results.len(),
            vector = outcome.vector_search_used,
            "ranked records"
        );
        outcome
    }

    /// Similarities for the top vector candidates, or empty with the reason
    /// recorded when the vector path cannot be used.
    fn vector_similarities(
        &self,
        records: &[Record],
        k: usize,
        embedding: Option<Result<Vec<f32>, SagaError>>,
        outcome: &mut RankedResults,
    ) -> HashMap<String, f32> {
        let index = match self.vectors {
            VectorPath::Disabled => return HashMap::new(),
            VectorPath::Unavailable(reason) => {
                outcome.fallback_reason = Some(reason.to_string());
                return HashMap::new();
            }
            VectorPath::Ready { index, .. } => index,
        };

        let query_vector = match embedding {
            Some(Ok(v)) if v.iter().any(|x| !x.is_finite()) => {
                let e = SagaError::ProviderUnavailable("query embedding has non-finite values".into());
                warn!(error = %e, "query embedding unusable, using lexical ranking");
                outcome.fallback_reason = Some(e.to_string());
                return HashMap::new();
            }
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                warn!(error = %e, "query embedding unavailable, using lexical ranking");
                outcome.fallback_reason = Some(e.to_string());
                return HashMap::new();
            }
            None => return HashMap::new(),
        };

        let current: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.id(), r.content_hash()))
            .collect();
        let candidates = k
            .saturating_mul(self.params.candidate_multiplier)
            .min(records.len());

        match index.search_fresh(&query_vector, candidates, &current) {
            Ok(fresh) => {
                if !fresh.stale.is_empty() {
                    warn!(
                        count = fresh.stale.len(),
                        "stale index entries excluded from vector scoring; rebuild recommended"
                    );
                }
                outcome.vector_search_used = true;
                outcome.stale_ids = fresh.stale;
                fresh.hits.into_iter().collect()
            }
            Err(e) => {
                tracing::error!(error = %e, "vector search failed, using lexical ranking");
                outcome.fallback_reason = Some(e.to_string());
                HashMap::new()
            }
        }
    }
}
