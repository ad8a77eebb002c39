//! In-process vector index over pre-chunked regulation text.
//!
//! Holds every chunk with its embedding and answers queries by exhaustive
//! cosine similarity. Suitable for framework corpora of a few thousand chunks
//! and for deterministic tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use verity_core::embed::cosine_sim;
use verity_core::{QueryEmbedder, RegulatoryChunk};

use crate::index::embed_query;
use crate::{IndexHit, RetrievalError, VectorIndex};

pub struct MemoryIndex {
    embedder: Arc<dyn QueryEmbedder>,
    entries: Vec<(RegulatoryChunk, Vec<f32>)>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn QueryEmbedder>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    /// Embed and add every chunk.
    pub fn from_chunks(
        embedder: Arc<dyn QueryEmbedder>,
        chunks: Vec<RegulatoryChunk>,
    ) -> Result<Self, RetrievalError> {
        let mut index = Self::new(embedder);
        for chunk in chunks {
            index.insert(chunk)?;
        }
        Ok(index)
    }

    /// Load chunks from a JSON Lines file, one [`RegulatoryChunk`] per line.
    pub fn load_jsonl(
        embedder: Arc<dyn QueryEmbedder>,
        path: &Path,
    ) -> Result<Self, RetrievalError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Unavailable(format!("{}: {e}", path.display())))?;

        let mut chunks = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: RegulatoryChunk = serde_json::from_str(line).map_err(|e| {
                RetrievalError::InvalidHit(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            chunks.push(chunk);
        }

        let index = Self::from_chunks(embedder, chunks)?;
        info!(chunks = index.len(), path = %path.display(), "loaded regulatory chunks");
        Ok(index)
    }

    pub fn insert(&mut self, chunk: RegulatoryChunk) -> Result<(), RetrievalError> {
        let embedding = self.embedder.embed(&chunk.text)?;
        self.entries.push((chunk, embedding));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        let query = embed_query(&self.embedder, text).await?;

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|(chunk, emb)| IndexHit {
                chunk: chunk.clone(),
                // Opposed vectors carry no support; map cosine onto [0, 1].
                similarity: f64::from(cosine_sim(&query, emb)).max(0.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
