//! Construction of the injected capabilities: query embedder, regulatory
//! index and language model.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use verity_ai::{ChatClient, LanguageModel, LexicalEmbedder};
use verity_core::QueryEmbedder;
use verity_store::{MemoryIndex, VectorIndex};

/// ONNX embedder when a model directory is given, lexical otherwise.
pub fn embedder(model_dir: Option<&Path>) -> anyhow::Result<Arc<dyn QueryEmbedder>> {
    match model_dir {
        #[cfg(feature = "onnx")]
        Some(dir) => {
            let embedder = verity_ai::OnnxEmbedder::load(dir)
                .with_context(|| format!("loading embedding model from {}", dir.display()))?;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "onnx"))]
        Some(_) => anyhow::bail!("--model-dir needs a build with the `onnx` feature"),
        None => {
            info!("using lexical query embedder");
            Ok(Arc::new(LexicalEmbedder::default()))
        }
    }
}

/// Open the regulatory index named on the command line.
pub async fn open_index(
    chunks: Option<&Path>,
    lance_db: Option<&Path>,
    lance_table: &str,
    embedder: Arc<dyn QueryEmbedder>,
) -> anyhow::Result<Arc<dyn VectorIndex>> {
    if let Some(path) = chunks {
        let index = MemoryIndex::load_jsonl(embedder, path)
            .with_context(|| format!("loading chunks from {}", path.display()))?;
        anyhow::ensure!(!index.is_empty(), "{} contains no chunks", path.display());
        eprintln!("  Index: {} ({} chunks, in memory)", path.display(), index.len());
        return Ok(Arc::new(index));
    }
    if let Some(path) = lance_db {
        return open_lance(path, lance_table, embedder).await;
    }
    anyhow::bail!("no regulatory index: pass --chunks <FILE.jsonl> or --lance-db <DIR>")
}

#[cfg(feature = "lancedb")]
async fn open_lance(
    path: &Path,
    table: &str,
    embedder: Arc<dyn QueryEmbedder>,
) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let index = verity_store::LanceIndex::open(path, table, embedder)
        .await
        .with_context(|| format!("opening LanceDB at {}", path.display()))?;
    let rows = index
        .count()
        .await
        .with_context(|| format!("reading table {table}"))?;
    eprintln!("  Index: {} table {table} ({rows} chunks)", path.display());
    Ok(Arc::new(index))
}

#[cfg(not(feature = "lancedb"))]
async fn open_lance(
    _path: &Path,
    _table: &str,
    _embedder: Arc<dyn QueryEmbedder>,
) -> anyhow::Result<Arc<dyn VectorIndex>> {
    anyhow::bail!("--lance-db needs a build with the `lancedb` feature")
}

/// OpenAI-compatible chat endpoint.
pub fn chat_model(
    url: &str,
    model: &str,
    api_key: Option<String>,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let client = ChatClient::new(url.to_string(), model.to_string(), timeout)
        .context("building HTTP client")?
        .with_api_key(api_key);
    if url.starts_with("http://") && !is_local(url) {
        warn!(url, "model endpoint is not using TLS");
    }
    info!(url, model, "using chat model");
    Ok(Arc::new(client))
}

fn is_local(url: &str) -> bool {
    let host = url
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "0.0.0.0")
}
