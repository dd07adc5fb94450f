use chat_relay::config::config_search_paths;
use chat_relay::providers::ProviderPreset;
use chat_relay::{build_router, AppState, ChatProvider, HttpProvider, Relay, RelayConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "chat-relay",
    about = "Chat, vision and transcription relay for OpenAI-compatible LLM providers",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Also append the request journal to this JSONL file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is normal in production.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = RelayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref provider) = cli.provider {
        config.provider.name = provider.clone();
        if let Some(preset) = ProviderPreset::from_name(provider) {
            config.provider.api_key_env = Some(preset.default_api_key_env.to_string());
        }
    }

    let logger = match cli.log_file {
        Some(ref path) => SharedLogger::new(path)?,
        None => SharedLogger::in_memory(),
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.provider.timeout_secs))
        .build()?;

    // A missing key degrades the provider routes instead of stopping the process.
    let provider: Option<Arc<dyn ChatProvider>> = match HttpProvider::from_config(&config, client) {
        Ok(p) => {
            info!("  Provider:  {} ({})", config.provider.name, p.base_url());
            Some(Arc::new(p))
        }
        Err(e) => {
            warn!("Provider unavailable, relay routes will answer 503: {}", e);
            logger.warn("startup", format!("Provider unavailable: {}", e));
            None
        }
    };

    info!("  Chat model:    {}", config.models.default_chat_model);
    info!("  Vision model:  {}", config.models.default_vision_model);
    info!("  Audio model:   {}", config.models.default_transcription_model);
    info!("  Timeout:       {}s", config.provider.timeout_secs);

    let relay = Relay::new(provider).with_redacted_errors(config.server.redact_errors);
    let port = config.port;
    let state = Arc::new(AppState {
        config,
        relay,
        logger: logger.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    logger.info("startup", format!("chat-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), bind_addr));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
