#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use sagashark::config::LexicalWeights;
use sagashark::embedding::EmbeddingProvider;
use sagashark::lexical::LexicalScorer;
use sagashark::ranker::{HybridParams, HybridRanker};
use sagashark::record::Record;

/// Vector size used by the test providers.
pub const DIM: usize = 16;

/// Fixed reference time so recency scores are reproducible.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap()
}

/// A record timestamped `days_ago` days before [`now`].
pub fn record_at(id: &str, title: &str, body: &str, tags: &[&str], days_ago: i64) -> Record {
    Record::new(
        id,
        title,
        body,
        tags.iter().copied(),
        now() - Duration::days(days_ago),
    )
    .unwrap()
}

/// A record a few days old.
pub fn record(id: &str, title: &str, body: &str, tags: &[&str]) -> Record {
    record_at(id, title, body, tags, 3)
}

/// Deterministic DIM-sized unit vector with a spike at `seed`.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// A ranker with default weights, pinned to [`now`], no vector path.
pub fn lexical_ranker<'a>() -> HybridRanker<'a> {
    HybridRanker::new(
        LexicalScorer::new(LexicalWeights::default()).with_now(now()),
        HybridParams::default(),
    )
}

/// Maps text to the spike of the first keyword it contains; anything else
/// gets a spike in the last dimension.
pub struct KeywordProvider {
    keywords: Vec<(&'static str, usize)>,
}

impl KeywordProvider {
    pub fn new(keywords: &[(&'static str, usize)]) -> Self {
        Self {
            keywords: keywords.to_vec(),
        }
    }
}

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lowered = text.to_lowercase();
        let seed = self
            .keywords
            .iter()
            .find(|(kw, _)| lowered.contains(kw))
            .map(|(_, seed)| *seed)
            .unwrap_or(DIM - 1);
        Ok(spike(seed))
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn provider_id(&self) -> String {
        format!("test:keyword-{DIM}")
    }
}

/// Always fails, like an unreachable model server.
pub struct FailingProvider;

impl EmbeddingProvider for FailingProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("provider offline")
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn provider_id(&self) -> String {
        format!("test:keyword-{DIM}")
    }
}

/// Sleeps before answering, for timeout tests.
pub struct SlowProvider(pub std::time::Duration);

impl EmbeddingProvider for SlowProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        std::thread::sleep(self.0);
        Ok(spike(0))
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn provider_id(&self) -> String {
        format!("test:keyword-{DIM}")
    }
}

/// The JWT / dark-mode pair used across ranking tests.
pub fn auth_and_ui() -> Vec<Record> {
    vec![
        record(
            "1",
            "JWT timeout fix",
            "Refresh tokens expired early because the clock skew window was zero.",
            &["auth"],
        ),
        record(
            "2",
            "Dark mode",
            "Added a colour palette toggle and persisted the preference.",
            &["ui"],
        ),
    ]
}
