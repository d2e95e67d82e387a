//! Error taxonomy for the retrieval core.
//!
//! Index corruption and dimension errors are always returned to the caller.
//! [`SagaError::ProviderUnavailable`] is the one variant the hybrid ranker
//! recovers from locally by falling back to lexical-only ranking.

use std::io;

use thiserror::Error;

/// Errors raised by the record, index, ranking and significance modules.
#[derive(Error, Debug)]
pub enum SagaError {
    /// A vector does not have the dimension the index was configured with.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector holds NaN or an infinity and cannot be compared.
    #[error("vector has a non-finite value at position {position}")]
    NonFiniteVector { position: usize },

    /// The on-disk artifact pair is inconsistent. Recover with a rebuild.
    #[error("vector index corrupt: {0}")]
    IndexCorrupt(String),

    /// The index on disk was produced by a different embedding provider.
    #[error("index was built by provider '{stored}', configured provider is '{configured}'; rebuild required")]
    ProviderChanged { stored: String, configured: String },

    /// A significance event violates its contract (caller bug).
    #[error("invalid significance event: {0}")]
    InvalidEvent(String),

    /// A record failed validation at construction time.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The embedding provider failed or timed out.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A configured pattern or weight is unusable.
    #[error("config error: {0}")]
    Config(String),

    /// The index lock could not be acquired or released.
    #[error("index lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SagaError {
    /// True for errors whose only automated recovery is rebuilding the index.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::IndexCorrupt(_) | Self::ProviderChanged { .. }
        )
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_and_provider_change_require_rebuild() {
        assert!(SagaError::IndexCorrupt("torn pair".into()).requires_rebuild());
        assert!(SagaError::ProviderChanged {
            stored: "hash:fnv1a-64".into(),
            configured: "local:all-MiniLM-L6-v2".into(),
        }
        .requires_rebuild());
        assert!(!SagaError::ProviderUnavailable("timeout".into()).requires_rebuild());
        assert!(!SagaError::DimensionMismatch { expected: 4, actual: 3 }.requires_rebuild());
    }

    #[test]
    fn dimension_mismatch_message_names_both_sizes() {
        let err = SagaError::DimensionMismatch { expected: 384, actual: 128 };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 128");
    }
}
