//! Vector index adapters
//!
//! The engine reads the index; ingestion writes it. Both go through the
//! [`VectorIndex`] trait so the in-memory backend used in tests and local
//! runs behaves like the hosted one.
//!
//! Chunk metadata uses the keys `source`, `page` (0-based), `chunk_index`
//! and `text`.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::IndexConfig;
use crate::secrets::{SecretCache, SecretManager, PINECONE_API_KEY};

pub type Result<T> = std::result::Result<T, IndexError>;

/// Free-form chunk metadata
pub type Metadata = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index request timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<IndexError> for EngineError {
    fn from(err: IndexError) -> Self {
        EngineError::RetrievalFailure(err.to_string())
    }
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Which vectors a delete removes
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteFilter {
    /// Vectors with these ids
    Ids(Vec<String>),

    /// Vectors whose metadata has every listed key/value pair
    Metadata(Metadata),

    /// Everything in the index
    All,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace one vector
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<()>;

    /// The `k` nearest vectors, best first
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexMatch>>;

    async fn delete(&self, filter: DeleteFilter) -> Result<()>;
}

/// Build the configured index adapter
pub fn from_config(config: &IndexConfig, secrets: Arc<SecretCache>) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pinecone" => {
            let host = config.host.clone().ok_or_else(|| {
                IndexError::Unavailable("index.host is not configured".to_string())
            })?;
            Ok(Arc::new(PineconeIndex::new(host, secrets)))
        }
        _ => Ok(Arc::new(InMemoryIndex::new())),
    }
}

/// Cosine similarity mapped onto [0, 1]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Process-local index with brute-force cosine search
#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<String, (Vec<f32>, Metadata)>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn dimension(&self) -> Option<usize> {
        self.records
            .read()
            .await
            .values()
            .next()
            .map(|(vector, _)| vector.len())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        if let Some(expected) = self.dimension().await {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        self.records
            .write()
            .await
            .insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexMatch>> {
        let records = self.records.read().await;

        let mut matches = Vec::with_capacity(records.len());
        for (id, (stored, metadata)) in records.iter() {
            if stored.len() != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: stored.len(),
                    actual: vector.len(),
                });
            }
            matches.push(IndexMatch {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            });
        }

        // ids break ties so the order does not depend on HashMap iteration
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, filter: DeleteFilter) -> Result<()> {
        let mut records = self.records.write().await;
        match filter {
            DeleteFilter::Ids(ids) => {
                for id in ids {
                    records.remove(&id);
                }
            }
            DeleteFilter::Metadata(filter) => {
                records.retain(|_, (_, metadata)| !metadata_matches(metadata, &filter));
            }
            DeleteFilter::All => records.clear(),
        }
        Ok(())
    }
}

/// Pinecone data-plane client
pub struct PineconeIndex {
    host: String,
    secrets: Arc<SecretCache>,
    client: Client,
}

#[derive(Deserialize)]
struct PineconeQueryResponse {
    #[serde(default)]
    matches: Vec<IndexMatch>,
}

impl PineconeIndex {
    pub fn new(host: impl Into<String>, secrets: Arc<SecretCache>) -> Self {
        let host = host.into();
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };
        Self {
            host: host.trim_end_matches('/').to_string(),
            secrets,
            client: Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        let api_key = self
            .secrets
            .get_secret(PINECONE_API_KEY)
            .map_err(|e| IndexError::AuthenticationFailed(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", api_key.unsecure())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IndexError::Timeout
                } else {
                    IndexError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(IndexError::AuthenticationFailed(format!(
                "Pinecone rejected the API key ({})",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::Unavailable(format!(
                "Pinecone error ({}): {}",
                status,
                SecretManager::scrub(&text)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        self.post(
            "/vectors/upsert",
            json!({ "vectors": [{ "id": id, "values": vector, "metadata": metadata }] }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexMatch>> {
        let response = self
            .post(
                "/query",
                json!({ "vector": vector, "topK": k, "includeMetadata": true }),
            )
            .await?;

        let parsed: PineconeQueryResponse = response
            .json()
            .await
            .map_err(|e| IndexError::ParseError(e.to_string()))?;
        Ok(parsed.matches)
    }

    async fn delete(&self, filter: DeleteFilter) -> Result<()> {
        let body = match filter {
            DeleteFilter::Ids(ids) => json!({ "ids": ids }),
            DeleteFilter::Metadata(filter) => {
                let clauses: Map<String, Value> = filter
                    .into_iter()
                    .map(|(key, value)| (key, json!({ "$eq": value })))
                    .collect();
                json!({ "filter": clauses })
            }
            DeleteFilter::All => json!({ "deleteAll": true }),
        };
        self.post("/vectors/delete", body).await?;
        Ok(())
    }
}
