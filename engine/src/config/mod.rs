//! Configuration management
//!
//! This module handles loading, validation, and management of the Sage configuration.
//! Configuration is stored in TOML format at ~/.sage/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **llm**: Generation provider settings (Ollama, OpenAI)
//! - **embedding**: Embedding service used for retrieval queries
//! - **index**: Vector index backend
//! - **search**: Web search provider
//! - **retrieval**: top-k and similarity threshold
//! - **memory**: Conversation window and idle-session TTL
//! - **timeouts**: Per-call deadlines for every external call
//! - **retry**: Bounded retry policy for generation
//! - **server**: HTTP bind address
//!
//! Every section except `core` and `llm` may be omitted and falls back to defaults.
//!
//! # Examples
//!
//! ```no_run
//! use sage_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Default provider: {}", config.llm.default_provider);
//! println!("Top-k: {}", config.retrieval.top_k);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Web search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// External call deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Generation retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (ollama, openai)
    pub default_provider: String,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,
    // Note: API key resolved through the secret cache, not stored in config
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider (ollama, openai)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Base URL of the embedding API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index backend (memory, pinecone)
    #[serde(default = "default_index_provider")]
    pub provider: String,

    /// Index host URL (pinecone only)
    #[serde(default)]
    pub host: Option<String>,
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search provider (tavily, none)
    #[serde(default = "default_search_provider")]
    pub provider: String,

    /// Base URL of the search API
    #[serde(default = "default_tavily_base_url")]
    pub base_url: String,

    /// Maximum web results kept per turn
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of nearest neighbours requested from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score (0.0-1.0) for a chunk to be kept
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of turn pairs kept per session
    #[serde(default = "default_window_turns")]
    pub window_turns: usize,

    /// Idle sessions older than this are torn down (0 disables the sweep)
    #[serde(default)]
    pub session_ttl_secs: u64,
}

/// Deadlines for external calls, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_classification_timeout")]
    pub classification_secs: u64,

    #[serde(default = "default_embedding_timeout")]
    pub embedding_secs: u64,

    #[serde(default = "default_index_timeout")]
    pub index_secs: u64,

    #[serde(default = "default_search_timeout")]
    pub search_secs: u64,

    #[serde(default = "default_generation_timeout")]
    pub generation_secs: u64,
}

/// Retry policy applied to generation calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retry, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_index_provider() -> String {
    "memory".to_string()
}

fn default_search_provider() -> String {
    "tavily".to_string()
}

fn default_tavily_base_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_max_results() -> usize {
    3
}

fn default_top_k() -> usize {
    4
}

fn default_similarity_threshold() -> f64 {
    0.15
}

fn default_window_turns() -> usize {
    10
}

fn default_classification_timeout() -> u64 {
    15
}

fn default_embedding_timeout() -> u64 {
    15
}

fn default_index_timeout() -> u64 {
    10
}

fn default_search_timeout() -> u64 {
    15
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_string(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_ollama_base_url(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            host: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            base_url: default_tavily_base_url(),
            max_results: default_max_results(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_turns: default_window_turns(),
            session_ttl_secs: 0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classification_secs: default_classification_timeout(),
            embedding_secs: default_embedding_timeout(),
            index_secs: default_index_timeout(),
            search_secs: default_search_timeout(),
            generation_secs: default_generation_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn classification(&self) -> Duration {
        Duration::from_secs(self.classification_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.sage/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();
        config.validate()?;

        // Serialize to TOML
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        // Write to file
        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Created default configuration at {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path (~/.sage/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".sage").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
            },
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Log level or a provider name is unknown
    /// - The similarity threshold is outside 0.0-1.0
    /// - `top_k`, `window_turns` or `max_results` is zero
    /// - `max_retries` exceeds 3
    /// - The pinecone backend is selected without a host
    pub fn validate(&self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Validate providers
        check_choice("llm.default_provider", &self.llm.default_provider, &["ollama", "openai"])?;
        check_choice("embedding.provider", &self.embedding.provider, &["ollama", "openai"])?;
        check_choice("index.provider", &self.index.provider, &["memory", "pinecone"])?;
        check_choice("search.provider", &self.search.provider, &["tavily", "none"])?;

        if self.index.provider == "pinecone" && self.index.host.is_none() {
            return Err(EngineError::Config(
                "index.host is required when index.provider = \"pinecone\"".to_string(),
            ));
        }

        // Validate thresholds and bounds
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(EngineError::Config(
                "similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".to_string()));
        }
        if self.search.max_results == 0 {
            return Err(EngineError::Config(
                "search.max_results must be at least 1".to_string(),
            ));
        }
        if self.memory.window_turns == 0 {
            return Err(EngineError::Config(
                "window_turns must be at least 1".to_string(),
            ));
        }
        if self.retry.max_retries > 3 {
            return Err(EngineError::Config(
                "max_retries must be between 0 and 3".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_choice(field: &str, value: &str, allowed: &[&str]) -> Result<(), EngineError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "Invalid {} '{}'. Must be one of: {}",
            field,
            value,
            allowed.join(", ")
        )))
    }
}
