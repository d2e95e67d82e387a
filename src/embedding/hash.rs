//! Deterministic hash embeddings.
//!
//! Projects tokens and token bigrams into a fixed number of signed buckets via
//! FNV-1a, then L2-normalizes. No model files, fully reproducible, and texts
//! sharing vocabulary land close together. Useful offline and in tests.

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Number of buckets each token is spread over.
const PROJECTIONS: u64 = 4;

pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn accumulate(&self, embedding: &mut [f32], token: &str, weight: f32) {
        let token_hash = fnv1a(token.as_bytes(), FNV_OFFSET);
        for salt in 0..PROJECTIONS {
            let h = fnv1a(&salt.to_le_bytes(), token_hash);
            let bucket = ((h >> 1) % self.dim as u64) as usize;
            let sign = if h & 1 == 0 { weight } else { -weight };
            embedding[bucket] += sign;
        }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dim];
        if self.dim == 0 {
            return Ok(embedding);
        }

        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
            .map(str::to_string)
            .collect();

        for token in &tokens {
            self.accumulate(&mut embedding, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut embedding, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        Ok(l2_normalize(&embedding))
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    fn provider_id(&self) -> String {
        format!("hash:fnv1a-{}", self.dim)
    }
}

fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
