//! Tidemark trading executor - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Webhook-driven perpetual-swap trading executor.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TIDEMARK_CONFIG).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tidemark_telemetry::init_logging()?;

    info!("starting tidemark v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > TIDEMARK_CONFIG env var > default.
    let config_path = args
        .config
        .or_else(|| std::env::var("TIDEMARK_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        info!(config_path = %config_path, "loading configuration");
        tidemark_bot::AppConfig::from_file(&config_path)?
    } else {
        info!(config_path = %config_path, "no config file found, using defaults");
        tidemark_bot::AppConfig::default()
    };

    let app = tidemark_bot::Application::new(config);
    app.run().await?;

    Ok(())
}
