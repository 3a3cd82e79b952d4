//! Sage Engine Library
//!
//! This library provides the core functionality of the Sage answer engine.
//! It is used by the `sage` binary, the HTTP API server and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// LLM provider abstraction layer
pub mod llm;

/// Conversation memory and session store
pub mod memory;

/// Query embedding adapters
pub mod embedding;

/// Vector index adapters
pub mod index;

/// Web search adapters
pub mod search;

/// Document retrieval
pub mod retrieval;

/// Citation building and evidence rendering
pub mod citations;

/// Tool dispatch and the calculator
pub mod tools;

/// Intent classification
pub mod classifier;

/// Turn pipeline
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
