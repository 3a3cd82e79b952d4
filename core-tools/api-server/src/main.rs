// Sage API server
// Serves the chat turn pipeline over HTTP

use anyhow::Context;
use api_server::{router, spawn_session_sweeper, AppState};
use sage_engine::agent::AgentCore;
use sage_engine::config::Config;
use sage_engine::handlers::SERVICE_NAME;
use sage_engine::memory::SessionStore;
use sage_engine::secrets::{SecretCache, SecretManager};
use sage_engine::telemetry::init_telemetry_with_level;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The first subscriber installed wins, so install it once the level is known
    let config = Config::load_or_create()?;
    init_telemetry_with_level(&config.core.log_level);

    let secrets = Arc::new(SecretCache::new(Arc::new(SecretManager::new(SERVICE_NAME))));
    let agent = AgentCore::from_config(&config, secrets).context("Failed to initialize agent")?;
    tracing::info!("Tools available: {:?}", agent.available_tools());

    let state = AppState::new(agent, SessionStore::new(config.memory.window_turns));

    if config.memory.session_ttl_secs > 0 {
        spawn_session_sweeper(
            Arc::clone(&state.sessions),
            Duration::from_secs(config.memory.session_ttl_secs),
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("Sage API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
