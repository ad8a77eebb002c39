//! Retrieval client: bounded, retried index queries and evidence ranking.
//!
//! Only transient failures ([`RetrievalError::is_retryable`]) are retried.
//! After the last attempt the error is returned to the caller; an outage is
//! never reported as "no evidence".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use verity_core::{AnalysisConfig, ChunkId, RetrievedEvidence};

use crate::{IndexHit, RetrievalError, VectorIndex};

/// Attempts and backoff for transient index failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles on each later one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
pub struct RetrievalClient {
    index: Arc<dyn VectorIndex>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl RetrievalClient {
    pub fn new(index: Arc<dyn VectorIndex>, call_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            index,
            call_timeout,
            retry,
        }
    }

    pub fn from_config(index: Arc<dyn VectorIndex>, config: &AnalysisConfig) -> Self {
        Self::new(
            index,
            config.per_call_timeout(),
            RetryPolicy {
                attempts: config.retrieval_attempts,
                base_delay: config.retry_base_delay(),
            },
        )
    }

    /// Top-`k` evidence for `text` with similarity at least `min_similarity`,
    /// most similar first.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievedEvidence>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let attempts = self.retry.attempts.max(1);

        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.call_timeout, self.index.query(text, k))
                .await
                .unwrap_or(Err(RetrievalError::Timeout(self.call_timeout)));

            match result {
                Ok(hits) => {
                    let evidence = rank_hits(hits, k, min_similarity);
                    tracing::debug!(
                        k,
                        min_similarity,
                        returned = evidence.len(),
                        attempt = attempt + 1,
                        "retrieved evidence"
                    );
                    return Ok(evidence);
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "index query failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Filter, dedupe and order raw index hits.
///
/// NaN similarities are dropped and the rest clamped to `[0, 1]`. Hits below
/// `min_similarity` are removed, duplicate chunk ids keep their best score,
/// and the result is sorted by descending similarity with ties broken by
/// ascending chunk id, then truncated to `k`.
pub fn rank_hits(hits: Vec<IndexHit>, k: usize, min_similarity: f64) -> Vec<RetrievedEvidence> {
    let mut best: HashMap<ChunkId, RetrievedEvidence> = HashMap::new();
    for hit in hits {
        if hit.similarity.is_nan() {
            continue;
        }
        let similarity = hit.similarity.clamp(0.0, 1.0);
        if similarity < min_similarity {
            continue;
        }
        match best.get_mut(&hit.chunk.id) {
            Some(existing) if existing.similarity >= similarity => {}
            Some(existing) => {
                existing.similarity = similarity;
                existing.chunk = hit.chunk;
            }
            None => {
                best.insert(
                    hit.chunk.id.clone(),
                    RetrievedEvidence {
                        chunk: hit.chunk,
                        similarity,
                    },
                );
            }
        }
    }

    let mut ranked: Vec<RetrievedEvidence> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use verity_core::RegulatoryChunk;

    fn hit(id: &str, similarity: f64) -> IndexHit {
        IndexHit {
            chunk: RegulatoryChunk {
                id: ChunkId::new(id),
                text: format!("text of {id}"),
                source_document_id: "gdpr".into(),
                offset: 0,
            },
            similarity,
        }
    }

    /// Fails with `error` for the first `failures` calls, then returns `hits`.
    struct FlakyIndex {
        failures: u32,
        error: fn() -> RetrievalError,
        hits: Vec<IndexHit>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)());
            }
            Ok(self.hits.clone())
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl VectorIndex for SlowIndex {
        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn flaky(failures: u32, error: fn() -> RetrievalError) -> Arc<FlakyIndex> {
        Arc::new(FlakyIndex {
            failures,
            error,
            hits: vec![hit("art-32", 0.8)],
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn rank_filters_sorts_and_truncates() {
        let ranked = rank_hits(
            vec![
                hit("b", 0.7),
                hit("low", 0.2),
                hit("a", 0.7),
                hit("top", 0.95),
                hit("nan", f64::NAN),
                hit("c", 0.5),
            ],
            3,
            0.35,
        );
        let ids: Vec<&str> = ranked.iter().map(|e| e.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "a", "b"]);
    }

    #[test]
    fn rank_dedupes_keeping_best_and_clamps() {
        let ranked = rank_hits(vec![hit("x", 0.4), hit("x", 1.3), hit("y", 0.6)], 5, 0.0);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.id.as_str(), "x");
        assert_eq!(ranked[0].similarity, 1.0);
        assert!(
            ranked
                .iter()
                .all(|e| (0.0..=1.0).contains(&e.similarity))
        );
    }

    #[test]
    fn rank_keeps_hits_equal_to_threshold() {
        let ranked = rank_hits(vec![hit("edge", 0.35), hit("below", 0.3499)], 4, 0.35);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk.id.as_str(), "edge");
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(200),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let index = flaky(2, || RetrievalError::Unavailable("connection refused".into()));
        let client = RetrievalClient::new(index.clone(), Duration::from_secs(5), fast_retry(3));

        let evidence = client.query("lawful basis", 4, 0.35).await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let index = flaky(10, || RetrievalError::Unavailable("connection refused".into()));
        let client = RetrievalClient::new(index.clone(), Duration::from_secs(5), fast_retry(3));

        let err = client.query("lawful basis", 4, 0.35).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)), "got {err:?}");
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let index = flaky(10, || RetrievalError::InvalidHit("bad row".into()));
        let client = RetrievalClient::new(index.clone(), Duration::from_secs(5), fast_retry(3));

        assert!(client.query("lawful basis", 4, 0.35).await.is_err());
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_index_times_out() {
        let client = RetrievalClient::new(
            Arc::new(SlowIndex),
            Duration::from_millis(50),
            fast_retry(2),
        );
        let err = client.query("lawful basis", 4, 0.35).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn zero_k_skips_the_index() {
        let index = flaky(0, || RetrievalError::Unavailable(String::new()));
        let client = RetrievalClient::new(index.clone(), Duration::from_secs(5), fast_retry(1));
        assert!(client.query("x", 0, 0.0).await.unwrap().is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }
}
