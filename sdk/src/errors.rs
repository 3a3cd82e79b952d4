//! Error types and handling
//!
//! This module provides the error types used throughout the Sage engine.
//! All errors implement the `SageErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! All user hints are static strings so that:
//! - No secrets (API keys, tokens) leak into answers
//! - No provider URLs or internal details reach remote users

use thiserror::Error;

/// Trait for Sage error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait SageErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users. The turn pipeline uses it as
    /// the degraded-service marker when a tool falls back to a plain answer.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors degrade a single turn. Non-recoverable errors
    /// typically require a configuration change or restart.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **LLM Provider**: API failures, timeouts, exhausted providers
/// - **Turn pipeline**: Classification, retrieval, search, calculator and
///   generation failures. Each one degrades a turn instead of failing it.
/// - **Requests**: Invalid chat requests
/// - **Secrets**: Keychain access
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, SageErrorExt};
///
/// let error = EngineError::SearchFailure("connection refused".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("bad provider".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,

    #[error("LLM call timed out")]
    LLMTimeout,

    // Turn pipeline errors
    #[error("Classification failed: {0}")]
    ClassificationFailure(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("Web search failed: {0}")]
    SearchFailure(String),

    #[error("Calculator parse error: {0}")]
    CalculatorParse(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    // Request errors
    #[error("Message must not be empty")]
    EmptyMessage,

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SageErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // LLM provider errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::AllProvidersExhausted => "No LLM providers available. Check configuration",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",

            // Turn pipeline errors
            Self::ClassificationFailure(_) => {
                "Could not determine the best tool; answered from general knowledge"
            }
            Self::RetrievalFailure(_) => {
                "Document search is unavailable; answered from general knowledge"
            }
            Self::SearchFailure(_) => "Web search is unavailable; answered from general knowledge",
            Self::CalculatorParse(_) => {
                "Only numbers and + - * / ^ ( ) . % are allowed in calculations"
            }
            Self::GenerationFailure(_) => {
                "Sorry, I couldn't generate an answer right now. Please try again"
            }

            // Request errors
            Self::EmptyMessage => "Please enter a message",

            // Keyring errors
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::AllProvidersExhausted | Self::KeyringError(_) => false,

            // All other errors degrade a single turn
            _ => true,
        }
    }
}
