//! BingX Trader - Main Entry Point
//!
//! Loads configuration and credentials, reconciles the account, then trades
//! the configured symbols until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bingx_trader::bingx::messages::Interval;
use bingx_trader::config::{load_config, Credentials};
use bingx_trader::coordinator::cancel_on_signal;
use bingx_trader::{BingxMarketStream, BingxRestClient, Coordinator};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Path to the API credentials file (overrides exchange.credentials_file)
    #[arg(long, env = "BINGX_CREDENTIALS")]
    credentials: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate configuration and credentials, then exit without connecting
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --log-level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting BingX trader");
    info!("Configuration file: {}", args.config);

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = load_config(Some(&args.config)).context("invalid configuration")?;
    let credentials_path = args
        .credentials
        .clone()
        .unwrap_or_else(|| config.exchange.credentials_file.clone());
    // before any network activity
    let credentials = Credentials::from_file(&credentials_path)
        .with_context(|| format!("cannot load credentials from {}", credentials_path))?;
    info!(symbols = ?config.symbol_names(), ?credentials, "Configuration loaded");

    if args.dry_run {
        info!("Dry run: configuration and credentials are valid");
        return Ok(());
    }

    let rest = BingxRestClient::new(&config.exchange, credentials)?;
    let stream = BingxMarketStream::new(&config.exchange, config.settings.heartbeat_interval_seconds);

    let mut coordinator = Coordinator::new(config.clone(), Arc::new(rest.clone()), Arc::new(stream));
    if config.strategy.warmup_klines > 0 {
        for symbol in config.symbol_names() {
            match rest
                .get_klines(&symbol, Interval::OneMinute, config.strategy.warmup_klines)
                .await
            {
                Ok(klines) => {
                    let closes = klines.into_iter().map(|k| k.close).collect();
                    coordinator = coordinator.with_warmup(symbol, closes);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => warn!(%symbol, error = %err, "Warm-up klines unavailable"),
            }
        }
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    coordinator.run(shutdown).await?;
    info!("Shutdown complete");
    Ok(())
}
