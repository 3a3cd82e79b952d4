//! Retrieval Engine
//!
//! Embeds the query, asks the vector index for the nearest chunks and turns
//! the hits into [`RetrievedChunk`]s: scores clamped into [0, 1], anything
//! below the similarity threshold dropped, the rest sorted by score with ties
//! kept in index order. The index is never written.

use sdk::errors::EngineError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index::{IndexError, IndexMatch, VectorIndex};

/// A chunk of an ingested document that matched the query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub source: String,

    /// 1-based page number
    pub page: u32,

    pub chunk_index: u32,

    /// Similarity in [0, 1]
    pub score: f64,

    pub text: String,
}

impl RetrievedChunk {
    /// Read a chunk out of index metadata
    ///
    /// Missing keys fall back to `"Unknown"`, page 0 and empty text. The
    /// stored page is 0-based and is reported 1-based.
    pub fn from_match(hit: &IndexMatch) -> Self {
        let meta = &hit.metadata;
        let as_u32 = |key: &str| {
            meta.get(key)
                .and_then(Value::as_f64)
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(0)
        };

        Self {
            source: meta
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            page: as_u32("page").saturating_add(1),
            chunk_index: as_u32("chunk_index"),
            score: clamp_score(hit.score),
            text: meta
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
}

impl From<RetrievalError> for EngineError {
    fn from(err: RetrievalError) -> Self {
        EngineError::RetrievalFailure(err.to_string())
    }
}

/// Clamp a raw similarity into [0, 1]; NaN counts as no similarity
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Drop chunks below `threshold` and order the rest by score, best first
///
/// The sort is stable, so equal scores keep the order the index returned.
pub fn rank_chunks(chunks: Vec<RetrievedChunk>, threshold: f64) -> Vec<RetrievedChunk> {
    let mut kept: Vec<RetrievedChunk> = chunks
        .into_iter()
        .map(|mut chunk| {
            chunk.score = clamp_score(chunk.score);
            chunk
        })
        .filter(|chunk| chunk.score >= threshold)
        .collect();

    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept
}

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    threshold: f64,
    embed_timeout: Duration,
    index_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        retrieval: &RetrievalConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            top_k: retrieval.top_k,
            threshold: retrieval.similarity_threshold,
            embed_timeout: timeouts.embedding(),
            index_timeout: timeouts.index(),
        }
    }

    /// Chunks relevant to `query`, best first; empty when nothing clears the threshold
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let vector = timeout(self.embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| RetrievalError::Timeout("embedding", self.embed_timeout))??;

        let hits = timeout(self.index_timeout, self.index.query(&vector, self.top_k))
            .await
            .map_err(|_| RetrievalError::Timeout("index query", self.index_timeout))??;

        let total = hits.len();
        let chunks = rank_chunks(
            hits.iter().map(RetrievedChunk::from_match).collect(),
            self.threshold,
        );

        tracing::debug!(
            "Retrieved {} chunk(s), {} above threshold {}",
            total,
            chunks.len(),
            self.threshold
        );

        Ok(chunks)
    }
}
