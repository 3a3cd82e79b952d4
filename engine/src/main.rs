// Sage answer engine
// Main entry point for the sage binary

use clap::Parser;
use sage_engine::cli::{Cli, Command, ConfigAction, SecretAction};
use sage_engine::config::Config;
use sage_engine::handlers::{
    handle_ask, handle_chat, handle_config_path, handle_config_show, handle_doctor,
    handle_secret_delete, handle_secret_set, handle_secret_status, OutputFormat,
};
use sage_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let config = if cli.config.is_some() {
        Config::load_from_path(&config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Sage v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Ask { question, session } => {
            tracing::info!("Answering one question in session '{}'", session);
            handle_ask(question, session, &config, format).await
        }

        Command::Chat { session } => {
            tracing::info!("Starting interactive chat in session '{}'", session);
            handle_chat(session, &config, format).await
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        },

        Command::Secret { action } => match action {
            SecretAction::Set { key } => handle_secret_set(&key),
            SecretAction::Delete { key } => handle_secret_delete(&key),
            SecretAction::Status => handle_secret_status(format),
        },

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
