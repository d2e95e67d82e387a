//! Text-to-vector embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait, a local ONNX implementation of
//! all-MiniLM-L6-v2 ([`local`]) and a deterministic model-free hash embedder
//! ([`hash`]). Providers are created via [`create_provider`] from
//! configuration; `none` yields no provider and the ranker stays lexical.

pub mod hash;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::EmbeddingConfig;
use crate::error::SagaError;

/// Trait for embedding text into vectors.
///
/// Implementations must be dimensionally consistent and idempotent: the same
/// text always yields the same vector. All methods are synchronous; callers in
/// async contexts should go through [`embed_query`] or
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Stable identifier stored in index metadata, e.g. `local:all-MiniLM-L6-v2`.
    /// A different identifier means a different vector space.
    fn provider_id(&self) -> String;
}

/// Create an embedding provider from config.
///
/// Returns `Ok(None)` for `provider = "none"`. Errors if the provider is
/// unknown or cannot be loaded (e.g. the local model is not downloaded yet).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "none" | "" => Ok(None),
        "hash" => {
            anyhow::ensure!(config.dimensions > 0, "embedding.dimensions must be greater than 0");
            Ok(Some(Arc::new(hash::HashEmbedder::new(config.dimensions))))
        }
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Some(Arc::new(provider)))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, hash, none"),
    }
}

/// Embed a query on the blocking pool, bounded by `timeout`.
///
/// Failure and expiry both map to [`SagaError::ProviderUnavailable`]; the
/// ranker treats that as "no vector search for this query".
pub async fn embed_query(
    provider: Arc<dyn EmbeddingProvider>,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, SagaError> {
    let text = text.to_string();
    let task = tokio::task::spawn_blocking(move || provider.embed(&text));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(vector))) => Ok(vector),
        Ok(Ok(Err(e))) => Err(SagaError::ProviderUnavailable(e.to_string())),
        Ok(Err(join)) => Err(SagaError::ProviderUnavailable(format!(
            "embedding task failed: {join}"
        ))),
        Err(_) => Err(SagaError::ProviderUnavailable(format!(
            "query embedding exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Text embedded for a record: title, blank line, body. Long texts keep the
/// head and tail around a `...` marker so the vector sees both ends.
pub fn record_text(title: &str, body: &str) -> String {
    const MAX_CHARS: usize = 2000;
    let text = format!("{title}\n\n{body}");
    let len = text.chars().count();
    if len <= MAX_CHARS {
        return text;
    }
    let half = MAX_CHARS / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{head}\n...\n{tail}")
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
