//! LLM Router
//!
//! Orders the configured providers (the user's default first, the rest in
//! registration order) and fails over between them. Every attempt runs under
//! a deadline. When the whole chain fails, the router waits the configured
//! backoff and walks the chain again, up to `max_retries` times.

use super::{LLMError, LLMProvider, Message};
use crate::config::{LLMConfig, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Deadline and retry policy applied to one router call
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    /// Deadline for a single provider attempt
    pub timeout: Duration,

    /// Full-chain retries after the first pass fails
    pub max_retries: u32,

    /// Delay before each retry
    pub backoff: Duration,
}

impl CallPolicy {
    /// One pass over the chain, no retry
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_retry(timeout: Duration, retry: &RetryConfig) -> Self {
        Self {
            timeout,
            max_retries: retry.max_retries,
            backoff: retry.backoff(),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// LLM Router that fails over between providers
pub struct LLMRouter {
    /// Available LLM providers
    providers: Vec<Box<dyn LLMProvider>>,

    /// LLM configuration
    config: Arc<LLMConfig>,
}

impl LLMRouter {
    /// Create a new LLM router
    ///
    /// # Arguments
    /// * `providers` - List of available LLM providers
    /// * `config` - LLM configuration
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, config: Arc<LLMConfig>) -> Self {
        Self { providers, config }
    }

    /// Number of registered providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Providers in the order they are attempted
    ///
    /// The configured default provider comes first; the sort is stable so the
    /// remaining providers keep their registration order.
    pub fn rank_providers(&self) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        let default_provider = self.config.default_provider.as_str();
        providers.sort_by_key(|p| p.name() != default_provider);

        providers
    }

    /// Call LLM providers with automatic failover
    ///
    /// Returns the generated text and the name of the provider that produced it.
    ///
    /// # Errors
    /// `LLMError::ProviderUnavailable` when no provider is registered,
    /// `LLMError::Exhausted` when every attempt of every pass failed
    pub async fn call(
        &self,
        messages: &[Message],
        policy: CallPolicy,
    ) -> super::Result<(String, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let ranked_providers = self.rank_providers();

        for pass in 0..=policy.max_retries {
            if pass > 0 {
                tracing::warn!(
                    "All providers failed, retrying in {}ms (retry {}/{})",
                    policy.backoff.as_millis(),
                    pass,
                    policy.max_retries
                );
                tokio::time::sleep(policy.backoff).await;
            }

            for provider in &ranked_providers {
                tracing::debug!(
                    "Attempting provider: {} (timeout: {}s)",
                    provider.name(),
                    policy.timeout.as_secs_f64()
                );

                let result = tokio::time::timeout(policy.timeout, provider.generate(messages)).await;

                match result {
                    Ok(Ok(text)) => {
                        tracing::info!("Provider {} succeeded", provider.name());
                        return Ok((text, provider.name().to_string()));
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Provider {} timed out after {:.1}s",
                            provider.name(),
                            policy.timeout.as_secs_f64()
                        );
                    }
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(LLMError::Exhausted)
    }

    /// Check the health of all registered providers
    /// Returns a list of (provider_name, model, is_healthy)
    pub async fn check_health(&self) -> Vec<(&str, &str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), provider.model(), is_healthy));
        }
        results
    }
}
