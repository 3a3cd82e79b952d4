//! Embedding service adapters
//!
//! Turns query text into the vector the index is searched with. The engine
//! only embeds queries; chunk vectors are produced at ingestion time by an
//! external pipeline with the same model.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::secrets::{SecretCache, SecretManager, OPENAI_API_KEY};

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        EngineError::RetrievalFailure(err.to_string())
    }
}

fn map_transport_error(base_url: &str, e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else if e.is_connect() {
        EmbeddingError::Unavailable(format!("Cannot connect to {}", base_url))
    } else {
        EmbeddingError::NetworkError(e.to_string())
    }
}

/// Text → fixed-length vector, deterministic per (text, model)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the configured embedding adapter
pub fn from_config(
    config: &EmbeddingConfig,
    secrets: Arc<SecretCache>,
) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "openai" => Arc::new(OpenAIEmbeddings::new(
            config.base_url.clone(),
            config.model.clone(),
            secrets,
        )),
        _ => Arc::new(OllamaEmbeddings::new(
            config.base_url.clone(),
            config.model.clone(),
        )),
    }
}

/// Ollama `/api/embed`
pub struct OllamaEmbeddings {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaEmbeddings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| map_transport_error(&self.base_url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!(
                "Ollama embed error ({}): {}",
                status,
                SecretManager::scrub(&body)
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ParseError(e.to_string()))?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::ParseError("No embedding in response".to_string()))
    }
}

/// OpenAI-compatible `/embeddings`
pub struct OpenAIEmbeddings {
    base_url: String,
    model: String,
    secrets: Arc<SecretCache>,
    client: Client,
}

impl OpenAIEmbeddings {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        secrets: Arc<SecretCache>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            secrets,
            client: Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAIEmbedResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = self
            .secrets
            .get_secret(OPENAI_API_KEY)
            .map_err(|e| EmbeddingError::AuthenticationFailed(e.to_string()))?;

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", api_key.bearer())
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| map_transport_error(&self.base_url, e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(EmbeddingError::AuthenticationFailed(format!(
                "OpenAI rejected the API key ({})",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!(
                "OpenAI embeddings error ({}): {}",
                status,
                SecretManager::scrub(&body)
            )));
        }

        let parsed: OpenAIEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ParseError(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::ParseError("No embedding in response".to_string()))
    }
}
