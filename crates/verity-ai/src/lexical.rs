//! Hashed bag-of-words embedder.
//!
//! Needs no model files. Each lowercase alphanumeric token of two or more
//! characters is hashed (FNV-1a) into one of `dim` buckets; the counts are
//! L2-normalised. Good enough for keyword-level recall over a small framework
//! corpus and fully deterministic.

use verity_core::embed::normalize;
use verity_core::{EmbedError, QueryEmbedder};

pub const DEFAULT_DIM: usize = 512;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Words too common in policy and regulation text to carry signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "of",
    "on", "or", "shall", "that", "the", "this", "to", "with",
];

#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dim: usize,
}

impl LexicalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl QueryEmbedder for LexicalEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
            v[bucket] += 1.0;
        }
        normalize(&mut v);
        Ok(v)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}
