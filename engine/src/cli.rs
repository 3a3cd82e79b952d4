//! CLI interface for Sage
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for asking questions, inspecting
//! configuration and managing API keys.

use clap::{Parser, Subcommand};
use sdk::types::DEFAULT_SESSION_ID;
use std::path::PathBuf;

/// Sage answer engine
///
/// Routes each question to your documents, the web, a calculator or the
/// model's general knowledge, and answers with citations.
#[derive(Parser, Debug)]
#[command(name = "sage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a single question
    Ask {
        /// The question
        question: String,

        /// Session to read and extend
        #[arg(short, long, default_value = DEFAULT_SESSION_ID)]
        session: String,
    },

    /// Interactive chat on stdin (type /clear to reset, /quit to leave)
    Chat {
        /// Session to read and extend
        #[arg(short, long, default_value = DEFAULT_SESSION_ID)]
        session: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage API keys in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Run system diagnostics
    Doctor,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}

/// API key actions
#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Prompt for a key and store it (openai_api_key, pinecone_api_key, tavily_api_key)
    Set {
        /// Secret name
        key: String,
    },

    /// Remove a stored key
    Delete {
        /// Secret name
        key: String,
    },

    /// Show which keys are available
    Status,
}
