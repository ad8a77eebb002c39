//! The vector-index capability the retrieval client depends on.

use std::sync::Arc;

use async_trait::async_trait;
use verity_core::{EmbedError, QueryEmbedder, RegulatoryChunk};

use crate::RetrievalError;

/// One ranked row from an index query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk: RegulatoryChunk,
    /// Similarity in `[0, 1]` (or monotonically mappable to it).
    pub similarity: f64,
}

/// A pre-built regulatory index, queried by text.
///
/// Constructed once per process and shared behind an `Arc`. Implementations
/// must answer in bounded time or fail with [`RetrievalError::Unavailable`];
/// they never hide an outage behind an empty result.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, RetrievalError>;
}

/// Embed query text on tokio's blocking pool.
///
/// Embedders are synchronous and may run model inference, so concurrent
/// section evaluations must not stall runtime workers on them.
pub(crate) async fn embed_query(
    embedder: &Arc<dyn QueryEmbedder>,
    text: &str,
) -> Result<Vec<f32>, RetrievalError> {
    let embedder = Arc::clone(embedder);
    let text = text.to_string();
    tokio::task::spawn_blocking(move || embedder.embed(&text))
        .await
        .map_err(|e| EmbedError(format!("embedding task failed: {e}")))?
        .map_err(RetrievalError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    struct ThreadRecorder {
        seen: Mutex<Vec<ThreadId>>,
    }

    impl QueryEmbedder for ThreadRecorder {
        fn dim(&self) -> usize {
            1
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.seen.lock().unwrap().push(thread::current().id());
            if text.is_empty() {
                return Err(EmbedError("empty query".into()));
            }
            Ok(vec![1.0])
        }
    }

    #[tokio::test]
    async fn embedding_runs_off_the_runtime_thread() {
        let recorder = Arc::new(ThreadRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let embedder: Arc<dyn QueryEmbedder> = recorder.clone();

        let v = embed_query(&embedder, "encryption").await.unwrap();
        assert_eq!(v, vec![1.0]);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_ne!(seen[0], thread::current().id());
    }

    #[tokio::test]
    async fn embedder_errors_pass_through() {
        let embedder: Arc<dyn QueryEmbedder> = Arc::new(ThreadRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let err = embed_query(&embedder, "").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
        assert!(!err.is_retryable());
    }
}
