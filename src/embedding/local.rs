//! all-MiniLM-L6-v2 through ONNX Runtime.
//!
//! Texts are tokenized as one padded batch, run through the model, and each
//! row of token embeddings is mean-pooled over its attention mask and
//! L2-normalized. Requires `model.onnx` and `tokenizer.json` in the
//! configured cache directory (`saga model download`).

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::{l2_normalize, EmbeddingProvider};
use crate::config::{expand_tilde, EmbeddingConfig};

/// Output width of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// The model was trained on sequences of at most 256 tokens.
const MAX_SEQ_LEN: usize = 256;

pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model: String,
}

// Safety: the tokenizer is Send + Sync and the session is only reached
// through the mutex.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

/// A tokenized batch, flattened row-major as `[rows, seq_len]`.
struct EncodedBatch {
    rows: usize,
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        for (what, path) in [("ONNX model", &model_path), ("Tokenizer", &tokenizer_path)] {
            anyhow::ensure!(
                path.exists(),
                "{what} not found at {}. Run `saga model download` first.",
                path.display()
            );
        }

        let session = load_session(&model_path)?;
        let tokenizer = load_tokenizer(&tokenizer_path)?;
        tracing::info!(model = %config.model, dir = %cache_dir.display(), "local embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model: config.model.clone(),
        })
    }

    fn encode(&self, texts: &[&str]) -> Result<EncodedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let rows = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());
        let mut input_ids = Vec::with_capacity(rows * seq_len);
        let mut attention_mask = Vec::with_capacity(rows * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| i64::from(id)));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| i64::from(m)));
        }

        Ok(EncodedBatch {
            rows,
            seq_len,
            input_ids,
            attention_mask,
        })
    }
}

fn load_session(path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQ_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    Ok(tokenizer)
}

/// Average the token rows of each sequence, weighted by its attention mask.
///
/// `hidden` is `[rows, seq_len, dim]` flattened; `mask` is `[rows, seq_len]`.
/// A row with an all-zero mask pools to the zero vector.
fn mean_pool(hidden: &[f32], mask: &[i64], rows: usize, seq_len: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|row| {
            let mut sum = vec![0.0f32; dim];
            let mut count = 0.0f32;
            for pos in 0..seq_len {
                let weight = mask[row * seq_len + pos] as f32;
                if weight == 0.0 {
                    continue;
                }
                let offset = (row * seq_len + pos) * dim;
                for (acc, value) in sum.iter_mut().zip(&hidden[offset..offset + dim]) {
                    *acc += value * weight;
                }
                count += weight;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|acc| *acc /= count);
            }
            sum
        })
        .collect()
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding batch returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.encode(texts)?;
        let shape = vec![batch.rows as i64, batch.seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), batch.input_ids.into_boxed_slice()))?;
        let attention_mask =
            Tensor::from_array((shape.clone(), batch.attention_mask.clone().into_boxed_slice()))?;
        // Single-segment input: every token type is 0.
        let token_type_ids = Tensor::from_array((
            shape,
            vec![0i64; batch.rows * batch.seq_len].into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        // Export tools disagree on the output name.
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;
        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3
                && dims[0] as usize == batch.rows
                && dims[1] as usize == batch.seq_len
                && dims[2] as usize == EMBEDDING_DIM,
            "unexpected token embedding shape {dims:?}, expected [{}, {}, {EMBEDDING_DIM}]",
            batch.rows,
            batch.seq_len
        );

        Ok(mean_pool(data, &batch.attention_mask, batch.rows, batch.seq_len, EMBEDDING_DIM)
            .iter()
            .map(|pooled| l2_normalize(pooled))
            .collect())
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn provider_id(&self) -> String {
        format!("local:{}", self.model)
    }
}
