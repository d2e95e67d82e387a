//! Lexical relevance: additive, string-only scoring of a query against a record.
//!
//! Every factor is computed separately into a [`LexicalBreakdown`] so a score
//! can be explained factor by factor. The total is the plain sum.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LexicalWeights;
use crate::record::Record;

/// Per-factor contributions to a lexical score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LexicalBreakdown {
    pub title_equal: f64,
    pub title_exact: f64,
    pub title_tokens: f64,
    pub body_exact: f64,
    pub body_repeats: f64,
    pub body_words: f64,
    pub tags: f64,
    pub kind: f64,
    pub branch: f64,
    pub recency: f64,
}

impl LexicalBreakdown {
    pub fn total(&self) -> f64 {
        self.title_equal
            + self.title_exact
            + self.title_tokens
            + self.body_exact
            + self.body_repeats
            + self.body_words
            + self.tags
            + self.kind
            + self.branch
            + self.recency
    }
}

/// Lower-cased alphanumeric runs of `text`, deduplicated.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Scores records against a query using configured weights and a fixed
/// reference time, so repeated calls give identical results.
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    weights: LexicalWeights,
    now: DateTime<Utc>,
}

/// A query normalized once and reused across records.
struct PreparedQuery {
    lowered: String,
    tokens: BTreeSet<String>,
}

impl LexicalScorer {
    pub fn new(weights: LexicalWeights) -> Self {
        Self {
            weights,
            now: Utc::now(),
        }
    }

    /// Fix the reference time used by the recency factor.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn weights(&self) -> &LexicalWeights {
        &self.weights
    }

    pub fn score(&self, query: &str, record: &Record) -> f64 {
        self.explain(query, record).total()
    }

    /// Score `record` for `query`, factor by factor. An empty query scores
    /// zero on every factor.
    pub fn explain(&self, query: &str, record: &Record) -> LexicalBreakdown {
        match prepare(query) {
            Some(q) => self.explain_prepared(&q, record),
            None => LexicalBreakdown::default(),
        }
    }

    /// Score every record, preserving input order.
    pub fn explain_all(&self, query: &str, records: &[Record]) -> Vec<LexicalBreakdown> {
        match prepare(query) {
            Some(q) => records.iter().map(|r| self.explain_prepared(&q, r)).collect(),
            None => vec![LexicalBreakdown::default(); records.len()],
        }
    }

    fn explain_prepared(&self, q: &PreparedQuery, record: &Record) -> LexicalBreakdown {
        let w = &self.weights;
        let mut b = LexicalBreakdown::default();

        let title = record.title().to_lowercase();
        if title.trim() == q.lowered {
            b.title_equal = w.title_equal;
        }
        if title.contains(&q.lowered) {
            b.title_exact = w.title_exact;
        }

        let title_tokens = tokenize(&title);
        let shared = q.tokens.intersection(&title_tokens).count().min(w.token_cap);
        b.title_tokens = shared as f64 * w.token;

        let body = record.body().to_lowercase();
        let occurrences = body.matches(q.lowered.as_str()).count();
        if occurrences > 0 {
            b.body_exact = w.body_exact;
            let extra = (occurrences - 1).min(w.body_repeat_cap);
            b.body_repeats = extra as f64 * w.body_repeat;
        } else {
            let body_tokens = tokenize(&body);
            let shared = q.tokens.intersection(&body_tokens).count();
            b.body_words = (shared as f64 * w.body_word).min(w.body_word_max);
        }

        let tag_hits = record
            .tags()
            .iter()
            .filter(|tag| tag_matches(tag, &q.tokens))
            .count()
            .min(w.tag_cap);
        b.tags = tag_hits as f64 * w.tag;

        if q.tokens.contains(record.kind().as_str()) {
            b.kind = w.kind;
        }

        if let Some(branch) = record.branch() {
            if q.lowered.contains(&branch.to_lowercase()) {
                b.branch = w.branch;
            }
        }

        b.recency = self.recency(record.timestamp());
        b
    }

    /// Linear decay from `recency_max` at age zero to nothing at the window edge.
    fn recency(&self, timestamp: DateTime<Utc>) -> f64 {
        let w = &self.weights;
        if w.recency_window_days <= 0.0 {
            return 0.0;
        }
        let age_days = (self.now - timestamp).num_seconds().max(0) as f64 / 86_400.0;
        let remaining = (1.0 - age_days / w.recency_window_days).clamp(0.0, 1.0);
        w.recency_max * remaining
    }
}

/// A tag matches when it is a query token, or when it is a compound such as
/// `dark-mode` or `ci/cd` whose every part is a query token.
fn tag_matches(tag: &str, query_tokens: &BTreeSet<String>) -> bool {
    if query_tokens.contains(tag) {
        return true;
    }
    let parts = tokenize(tag);
    !parts.is_empty() && parts.is_subset(query_tokens)
}

fn prepare(query: &str) -> Option<PreparedQuery> {
    let lowered = query.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    let tokens = tokenize(&lowered);
    Some(PreparedQuery { lowered, tokens })
}

/// Deterministic ordering for equal scores: newer first, then id ascending.
pub fn tie_break(a: &Record, b: &Record) -> Ordering {
    b.timestamp()
        .cmp(&a.timestamp())
        .then_with(|| a.id().cmp(b.id()))
}
