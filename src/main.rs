//! Smart Wallet Tracker - follow Solana wallets and report their trades

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Use the library crate
use smart_wallet_tracker::cli::commands;
use smart_wallet_tracker::config::{Config, LoggingConfig};

/// Smart Wallet Tracker - watch wallets and report token transfers
#[derive(Parser)]
#[command(name = "track")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking the configured wallets
    Start,

    /// Analyze one transaction for a wallet
    Analyze {
        /// Wallet address the transfers are relative to
        wallet: String,

        /// Transaction signature
        signature: String,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC and price service health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging)?;

    // Execute command
    let result = match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::Analyze { wallet, signature } => {
            commands::analyze(&config, &wallet, &signature).await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Stdout logging plus an optional append-only log file
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("smart_wallet_tracker=info".parse()?);

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = match logging.file.as_deref().filter(|path| !path.is_empty()) {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = Mutex::new(file);
            let layer = if logging.json_file {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}
