//! Hybrid retrieval for development sagas: find the most relevant past record
//! for a free-text query, offline, and decide whether a change is worth
//! writing a record about.
//!
//! Records are short narratives (title, body, tags, timestamp) supplied by a
//! [`record::RecordStore`]. Ranking blends two signals:
//!
//! | Signal | Source | Always available |
//! |--------|--------|------------------|
//! | **Lexical** | String matching on title, body, tags, recency | Yes |
//! | **Vector** | Cosine similarity of query and record embeddings | Only with a provider and a readable index |
//!
//! When the vector path is missing, slow, or broken, ranking degrades to
//! lexical scores and says so in the result set.
//!
//! # Architecture
//!
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions),
//!   or a deterministic hash embedder for offline use and tests
//! - **Index**: append-only slots persisted as a binary vector file plus JSON
//!   metadata, written atomically under an advisory file lock
//! - **Ranking**: additive blend `lexical + weight * (similarity + 1) * scale`
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`error`]: the library error type
//! - [`record`]: validated records and record stores
//! - [`lexical`]: multi-factor lexical scorer
//! - [`embedding`]: text-to-vector providers
//! - [`index`]: vector index, persistence, locking and health checks
//! - [`ranker`]: hybrid ranker with lexical fallback
//! - [`significance`]: significance heuristic for commits and other changes

pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod ranker;
pub mod record;
pub mod significance;

pub use error::{Result, SagaError};
