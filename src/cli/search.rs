//! CLI `search` command: hybrid ranking from the terminal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use sagashark::config::SagaConfig;
use sagashark::embedding::{self, EmbeddingProvider};
use sagashark::index::VectorIndex;
use sagashark::ranker::{HybridRanker, RankedResults, VectorPath};

pub struct SearchOptions {
    pub limit: usize,
    pub text_only: bool,
    pub explain: bool,
}

/// Vector state resolved before ranking. Failures become a fallback reason.
enum VectorSetup {
    Disabled,
    Unavailable(String),
    Ready {
        provider: Arc<dyn EmbeddingProvider>,
        index: VectorIndex,
    },
}

pub async fn search(config: &SagaConfig, query: &str, options: &SearchOptions) -> Result<()> {
    let records = super::load_records(config)?;
    let setup = if options.text_only {
        VectorSetup::Disabled
    } else {
        vector_setup(config)
    };
    let ranker = HybridRanker::from_config(&config.ranking).with_explain(options.explain);

    let ranked = match &setup {
        VectorSetup::Disabled => ranker.rank(query, &records, options.limit),
        VectorSetup::Unavailable(reason) => ranker
            .with_vector_path(VectorPath::Unavailable(reason))
            .rank(query, &records, options.limit),
        VectorSetup::Ready { provider, index } => {
            let timeout = Duration::from_millis(config.embedding.timeout_ms);
            let embedding = embedding::embed_query(Arc::clone(provider), query, timeout).await;
            ranker
                .with_vectors(provider.as_ref(), index)
                .rank_with_query_embedding(query, &records, options.limit, embedding)
        }
    };

    print_results(&ranked, options.explain);
    Ok(())
}

fn vector_setup(config: &SagaConfig) -> VectorSetup {
    let provider = match embedding::create_provider(&config.embedding) {
        Ok(Some(provider)) => provider,
        Ok(None) => return VectorSetup::Disabled,
        Err(e) => {
            tracing::warn!(error = %e, "embedding provider unavailable, searching lexically");
            return VectorSetup::Unavailable(e.to_string());
        }
    };

    match super::index_store(config).load_for(provider.as_ref()) {
        Ok(Some(index)) => VectorSetup::Ready { provider, index },
        Ok(None) => VectorSetup::Unavailable("index not built; run `saga index rebuild`".into()),
        Err(e) => {
            if e.requires_rebuild() {
                tracing::warn!(error = %e, "vector index unusable; run `saga index rebuild`");
            } else {
                tracing::error!(error = %e, "failed to load vector index");
            }
            VectorSetup::Unavailable(e.to_string())
        }
    }
}

fn print_results(ranked: &RankedResults, explain: bool) {
    if ranked.results.is_empty() {
        println!("No results found.");
        return;
    }

    let mode = if ranked.vector_search_used {
        "hybrid"
    } else {
        "lexical only"
    };
    println!("Found {} result(s) [{mode}]", ranked.results.len());
    if let Some(reason) = &ranked.fallback_reason {
        println!("  vector search skipped: {reason}");
    }
    if !ranked.stale_ids.is_empty() {
        println!(
            "  {} stale vector(s) ignored: {}",
            ranked.stale_ids.len(),
            ranked.stale_ids.join(", ")
        );
    }
    println!();

    for (i, result) in ranked.results.iter().enumerate() {
        let vector = result
            .vector_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {}. {} [{}] (score: {:.2}, lexical: {:.2}, vector: {vector})",
            i + 1,
            result.title,
            result.record_id,
            result.combined_score,
            result.lexical_score,
        );
        if explain {
            if let Some(b) = &result.breakdown {
                println!(
                    "     title={:.1}/{:.1}/{:.1} body={:.1}/{:.1}/{:.1} tags={:.1} kind={:.1} branch={:.1} recency={:.2}",
                    b.title_equal,
                    b.title_exact,
                    b.title_tokens,
                    b.body_exact,
                    b.body_repeats,
                    b.body_words,
                    b.tags,
                    b.kind,
                    b.branch,
                    b.recency,
                );
            }
        }
    }
}
