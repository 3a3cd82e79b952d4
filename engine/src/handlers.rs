//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - ask: Run one chat turn and print the answer
//! - chat: Interactive session on stdin
//! - config show / path: Inspect configuration
//! - secret set / delete / status: Manage API keys
//! - doctor: Validate configuration and check external services

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{AgentCore, ChatTurnResult};
use crate::config::Config;
use crate::memory::SessionStore;
use crate::secrets::{
    SecretCache, SecretManager, OPENAI_API_KEY, PINECONE_API_KEY, TAVILY_API_KEY,
};
use crate::{embedding, index, search};
use sdk::{ChatRequest, Citation, ClearHistoryResponse, OriginKind};

/// Keychain service name
pub const SERVICE_NAME: &str = "sage";

const KNOWN_SECRETS: [&str; 3] = [OPENAI_API_KEY, PINECONE_API_KEY, TAVILY_API_KEY];

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn secret_cache() -> Arc<SecretCache> {
    Arc::new(SecretCache::new(Arc::new(SecretManager::new(SERVICE_NAME))))
}

fn build_agent(config: &Config) -> Result<AgentCore> {
    AgentCore::from_config(config, secret_cache()).context("Failed to initialize agent")
}

/// Ask a single question
pub async fn handle_ask(
    question: String,
    session: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let agent = build_agent(config)?;
    let sessions = SessionStore::new(config.memory.window_turns);

    let result = agent
        .process_turn(&sessions, &ChatRequest::new(question, session))
        .await;

    print_turn(&result, format)
}

/// Interactive chat on stdin
///
/// `/clear` empties the session history and `/quit` (or end of input) leaves.
pub async fn handle_chat(session: String, config: &Config, format: OutputFormat) -> Result<()> {
    let agent = build_agent(config)?;
    let sessions = SessionStore::new(config.memory.window_turns);

    if matches!(format, OutputFormat::Text) {
        println!("Sage chat (session '{}'). Type /clear to reset, /quit to leave.", session);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                let removed = sessions.clear(&session).await;
                match format {
                    OutputFormat::Text => println!("History cleared ({} turns).", removed),
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::to_string(&ClearHistoryResponse::cleared(&session))?
                    ),
                }
            }
            message => {
                let result = agent
                    .process_turn(&sessions, &ChatRequest::new(message, session.clone()))
                    .await;
                print_turn(&result, format)?;
            }
        }
    }

    Ok(())
}

fn print_turn(result: &ChatTurnResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result.to_response())?);
        }
        OutputFormat::Text => {
            println!("{}", result.answer);

            if let Some(degraded) = &result.degraded {
                println!();
                println!("(note: {})", degraded);
            }

            if let Some(sources) = result.sources.as_ref().filter(|s| !s.is_empty()) {
                println!();
                println!("Sources:");
                print_citations(sources);
            }

            if let Some(sources) = result.web_sources.as_ref().filter(|s| !s.is_empty()) {
                println!();
                println!("Web sources:");
                print_citations(sources);
            }

            println!();
            println!("[tool: {}]", result.tool_used);
        }
    }
    Ok(())
}

fn print_citations(citations: &[Citation]) {
    for citation in citations {
        match citation.kind {
            OriginKind::Web => println!(
                "  [{}] {} ({})",
                citation.id,
                citation.title.as_deref().unwrap_or("Untitled"),
                citation.url.as_deref().unwrap_or("")
            ),
            OriginKind::Document => {
                let relevance = citation
                    .relevance_label
                    .map(|label| format!(" ({} relevance)", label))
                    .unwrap_or_default();
                println!(
                    "  [{}] {}, page {}{}",
                    citation.id,
                    citation.source.as_deref().unwrap_or("Unknown"),
                    citation.page.unwrap_or(1),
                    relevance
                );
            }
        }
    }
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!(
            "{}",
            toml::to_string_pretty(config).context("Failed to serialize config")?
        ),
    }
    Ok(())
}

/// Print the configuration file path
pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", json!({ "path": path })),
        OutputFormat::Text => println!("{}", path.display()),
    }
    Ok(())
}

/// Prompt for a secret and store it in the keychain
pub fn handle_secret_set(key: &str) -> Result<()> {
    check_secret_name(key)?;
    SecretManager::new(SERVICE_NAME).prompt_and_store(key)?;
    println!("Stored '{}' in the keychain.", key);
    Ok(())
}

/// Remove a secret from the keychain
pub fn handle_secret_delete(key: &str) -> Result<()> {
    check_secret_name(key)?;
    SecretManager::new(SERVICE_NAME).delete_secret(key)?;
    println!("Deleted '{}' from the keychain.", key);
    Ok(())
}

/// Show which secrets are available from the environment or keychain
pub fn handle_secret_status(format: OutputFormat) -> Result<()> {
    let manager = SecretManager::new(SERVICE_NAME);
    let status: Vec<(&str, bool)> = KNOWN_SECRETS
        .iter()
        .map(|key| (*key, manager.has_secret(key)))
        .collect();

    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = status
                .iter()
                .map(|(key, set)| (key.to_string(), json!(set)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for (key, set) in status {
                println!(
                    "  {:<25} {}",
                    format!("{}:", key),
                    if set { "Configured" } else { "Not configured" }
                );
            }
        }
    }
    Ok(())
}

fn check_secret_name(key: &str) -> Result<()> {
    if KNOWN_SECRETS.contains(&key) {
        Ok(())
    } else {
        anyhow::bail!(
            "Unknown secret '{}'. Expected one of: {}",
            key,
            KNOWN_SECRETS.join(", ")
        )
    }
}

/// Validate configuration and check external services
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Check 1: Configuration validation
    match config.validate() {
        Ok(()) => checks.push(("Configuration".to_string(), "Valid".to_string())),
        Err(e) => {
            checks.push(("Configuration".to_string(), "Invalid".to_string()));
            issues.push(e.to_string());
        }
    }

    let secrets = secret_cache();

    // Check 2: API keys
    for key in KNOWN_SECRETS {
        let status = if secrets.has_secret(key) {
            "Configured"
        } else {
            "Not configured"
        };
        checks.push((key.to_string(), status.to_string()));
    }

    // Check 3: Generation providers
    match AgentCore::from_config(config, Arc::clone(&secrets)) {
        Ok(agent) => {
            let health = agent.router().check_health().await;
            if !health.iter().any(|(_, _, healthy)| *healthy) {
                issues.push(
                    "No LLM provider is reachable. Start Ollama or configure OpenAI.".to_string(),
                );
            }
            for (name, model, healthy) in health {
                let status = if healthy { "Available" } else { "Not available" };
                checks.push((format!("{} ({})", name, model), status.to_string()));
            }
        }
        Err(e) => {
            checks.push(("Agent".to_string(), "Failed".to_string()));
            issues.push(format!("Cannot initialize agent: {}", e));
        }
    }

    // Check 4: Retrieval backends
    let embedder = embedding::from_config(&config.embedding, Arc::clone(&secrets));
    checks.push((
        "Embeddings".to_string(),
        format!("{} ({})", embedder.name(), embedder.model()),
    ));

    match index::from_config(&config.index, Arc::clone(&secrets)) {
        Ok(vector_index) => {
            checks.push(("Vector index".to_string(), vector_index.name().to_string()));
            if config.index.provider == "memory" {
                issues.push(
                    "Using the in-memory index; document questions will find no sources."
                        .to_string(),
                );
            } else if !secrets.has_secret(PINECONE_API_KEY) {
                issues.push(format!(
                    "Pinecone selected but '{}' is not set. Run 'sage secret set {}'.",
                    PINECONE_API_KEY, PINECONE_API_KEY
                ));
            }
        }
        Err(e) => {
            checks.push(("Vector index".to_string(), "Failed".to_string()));
            issues.push(format!("Cannot initialize vector index: {}", e));
        }
    }

    // Check 5: Web search
    match search::from_config(&config.search, Arc::clone(&secrets)) {
        Some(provider) => {
            checks.push(("Web search".to_string(), provider.name().to_string()));
            if !secrets.has_secret(TAVILY_API_KEY) {
                issues.push(format!(
                    "Web search enabled but '{}' is not set. Run 'sage secret set {}'.",
                    TAVILY_API_KEY, TAVILY_API_KEY
                ));
            }
        }
        None => checks.push(("Web search".to_string(), "Disabled".to_string())),
    }

    match format {
        OutputFormat::Text => {
            println!("Sage Diagnostics");
            println!("================");
            println!();

            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("Issues found:");
                for issue in &issues {
                    println!("  ✗ {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let checks: serde_json::Map<String, serde_json::Value> = checks
                .into_iter()
                .map(|(check, status)| (check, json!(status)))
                .collect();
            let output = json!({
                "checks": checks,
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
