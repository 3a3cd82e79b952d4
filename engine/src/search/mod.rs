//! Web search adapters
//!
//! `query(text) → ordered [{title, url, snippet}]`. The dispatcher caps the
//! number of results and applies the search deadline.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::secrets::{SecretCache, SecretManager, TAVILY_API_KEY};

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search provider unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Search request timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Web search is disabled")]
    Disabled,
}

impl From<SearchError> for EngineError {
    fn from(err: SearchError) -> Self {
        EngineError::SearchFailure(err.to_string())
    }
}

/// One web search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>>;

    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the configured search adapter; `None` when search is turned off
pub fn from_config(
    config: &SearchConfig,
    secrets: Arc<SecretCache>,
) -> Option<Arc<dyn SearchProvider>> {
    match config.provider.as_str() {
        "tavily" => Some(Arc::new(TavilySearch::new(config.base_url.clone(), secrets))),
        _ => None,
    }
}

/// Tavily `/search`
pub struct TavilySearch {
    base_url: String,
    secrets: Arc<SecretCache>,
    client: Client,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(base_url: impl Into<String>, secrets: Arc<SecretCache>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secrets,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn check_health(&self) -> bool {
        self.secrets.has_secret(TAVILY_API_KEY)
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        let api_key = self
            .secrets
            .get_secret(TAVILY_API_KEY)
            .map_err(|e| SearchError::AuthenticationFailed(e.to_string()))?;

        tracing::debug!("Tavily search: max_results={}", max_results);

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", api_key.bearer())
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else {
                    SearchError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = SecretManager::scrub(&response.text().await.unwrap_or_default());
            return Err(match status.as_u16() {
                401 | 403 => SearchError::AuthenticationFailed(text),
                429 => SearchError::RateLimitExceeded,
                _ => SearchError::Unavailable(format!("Tavily error ({}): {}", status, text)),
            });
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty() || !r.content.is_empty())
            .take(max_results)
            .map(|r| WebResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect())
    }
}
