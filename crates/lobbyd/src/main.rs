//! Lobby daemon entry point.
//!
//! Loads configuration, applies CLI overrides, sets up logging and runs the
//! lobby server with the built-in games until a shutdown signal arrives.

mod cli;
mod config;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use lobby_runtime::LobbyServer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false).with_thread_ids(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_file(false).with_line_number(false).with_thread_ids(true))
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

struct Application {
    config: AppConfig,
    server: Arc<LobbyServer>,
}

impl Application {
    async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("loading {}", args.config_path.display()))?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

        setup_logging(&config.logging)?;

        let games = lobby_games::builtin_registry()?;
        let server = Arc::new(LobbyServer::new(config.to_server_config()?, games));

        info!("📂 Config: {}", args.config_path.display());
        Ok(Self { config, server })
    }

    async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  🎲 Max lobbies: {}", self.config.lobbies.max_lobbies);
        info!(
            "  🔑 Join codes: {} chars from {}",
            self.config.lobbies.code_length, self.config.lobbies.code_alphabet
        );

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        tokio::select! {
            result = &mut server_handle => {
                // The listener stopped on its own, most likely a bind failure.
                result??;
                return Ok(());
            }
            result = signals::wait_for_shutdown() => {
                result?;
            }
        }

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        self.server.shutdown();
        server_handle.await??;
        info!("✅ Lobby server shut down cleanly");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
