//! LanceDB-backed regulatory index.
//!
//! Reads a pre-built table, `regulatory_chunks` by default, with columns
//! `chunk_id`, `text`, `source_document_id`, `offset` and a
//! `FixedSizeList<Float32, dim>` `embedding`. Queries are embedded with the
//! same model that built the table and searched by cosine distance.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float32Array, LargeStringArray, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, info};
use verity_core::{ChunkId, QueryEmbedder, RegulatoryChunk};

use crate::index::embed_query;
use crate::{IndexHit, RetrievalError, VectorIndex};

pub const DEFAULT_TABLE: &str = "regulatory_chunks";

pub struct LanceIndex {
    db: lancedb::Connection,
    table: String,
    embedder: Arc<dyn QueryEmbedder>,
}

impl LanceIndex {
    /// Connect to a LanceDB database at the given path.
    ///
    /// Creates the database directory if it doesn't exist.
    pub async fn open(
        path: &Path,
        table: &str,
        embedder: Arc<dyn QueryEmbedder>,
    ) -> Result<Self, RetrievalError> {
        let uri = path
            .to_str()
            .ok_or_else(|| RetrievalError::Unavailable("non-UTF8 database path".into()))?;
        let db = lancedb::connect(uri).execute().await?;
        info!(path = %path.display(), table, "opened lance index");
        Ok(Self {
            db,
            table: table.to_string(),
            embedder,
        })
    }

    pub async fn count(&self) -> Result<usize, RetrievalError> {
        let table = self.db.open_table(&self.table).execute().await?;
        Ok(table.count_rows(None).await?)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        let vector = embed_query(&self.embedder, text).await?;
        let table = self.db.open_table(&self.table).execute().await?;
        let batches: Vec<RecordBatch> = table
            .vector_search(vector)?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(batch_to_hits(batch)?);
        }
        debug!(table = %self.table, k, hits = hits.len(), "lance vector search");
        Ok(hits)
    }
}

/// Convert a search result batch into hits. Similarity is `1 - _distance`.
fn batch_to_hits(batch: &RecordBatch) -> Result<Vec<IndexHit>, RetrievalError> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| RetrievalError::InvalidHit(format!("missing column {name}")))
    };
    let ids = column("chunk_id")?;
    let texts = column("text")?;
    let sources = column("source_document_id")?;
    let offsets = column("offset")?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| RetrievalError::InvalidHit("offset column is not UInt64".into()))?;
    let distances = column("_distance")?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| RetrievalError::InvalidHit("_distance column is not Float32".into()))?;

    (0..batch.num_rows())
        .map(|row| {
            let id = get_string(ids.as_ref(), row)
                .ok_or_else(|| RetrievalError::InvalidHit(format!("row {row} has no chunk_id")))?;
            Ok(IndexHit {
                chunk: RegulatoryChunk {
                    id: ChunkId::new(id),
                    text: get_string(texts.as_ref(), row).unwrap_or_default(),
                    source_document_id: get_string(sources.as_ref(), row).unwrap_or_default(),
                    offset: offsets.value(row),
                },
                similarity: 1.0 - f64::from(distances.value(row)),
            })
        })
        .collect()
}

fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}
