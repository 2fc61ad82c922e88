use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{Credentials, RelayConfig};
use relay_telegram::TelegramAdapter;

mod app;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Relay Telegram chats to a language model")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info,relay_agent=info,relay_telegram=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("RELAY_GIT_SHA"),
        "relay starting"
    );

    // config and credentials problems are fatal before any network activity
    let config = RelayConfig::load(cli.config.as_deref())?;
    let credentials = Credentials::from_env()?;

    let shutdown = CancellationToken::new();
    let provider = app::build_provider(&config, credentials.openai_api_key.clone());
    let state = Arc::new(app::AppState::build(config, provider, shutdown.clone())?);
    info!(
        model = %state.agent.model(),
        mode = ?state.config.agent.prompt_mode,
        stream = state.config.agent.stream,
        capacity = state.config.context.capacity,
        scope = ?state.config.context.scope,
        "agent ready"
    );

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c listener failed");
            return;
        }
        info!("ctrl-c received, shutting down");
        ctrl_c.cancel();
    });

    TelegramAdapter::new(&credentials.telegram_bot_token, Arc::clone(&state), shutdown)
        .run()
        .await?;

    info!("relay stopped");
    Ok(())
}
