//! CLI command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyzer::TransactionAnalyzer;
use crate::config::Config;
use crate::enrichment::{build_metadata_source, PriceApiClient};
use crate::rpc::SolanaRpc;
use crate::sink::{render_event, ConsoleSink};
use crate::tracker::Tracker;
use crate::types::{TransactionSignature, WalletAddress};

/// Wrapped SOL mint, used to probe the price service
const PROBE_TOKEN: &str = "So11111111111111111111111111111111111111112";

/// Start tracking every configured wallet until Ctrl-C
pub async fn start(config: &Config) -> Result<()> {
    info!("Starting smart wallet tracker...");
    info!(
        "Watching {} wallets, polling every {}ms",
        config.tracking.wallets.len(),
        config.tracking.poll_interval_ms
    );

    let tracker = Tracker::from_config(config, Arc::new(ConsoleSink))
        .context("Failed to build tracker")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C; stopping"),
        }
        shutdown.cancel();
    });

    println!("Monitoring smart wallets... (Ctrl-C to stop)");
    tracker.run(cancel).await;

    println!("\n=== SESSION SUMMARY ===\n");
    for (wallet, status) in tracker.health() {
        let (events, analyzed, failed_cycles) = tracker
            .stats(&wallet)
            .map(|s| (s.events(), s.analyzed(), s.cycles_failed()))
            .unwrap_or_default();
        println!(
            "{}  {}  events={} analyzed={} failed_cycles={}",
            wallet, status, events, analyzed, failed_cycles
        );
    }
    println!("Monitoring stopped");

    Ok(())
}

/// Analyze a single transaction for one wallet and print the result
pub async fn analyze(config: &Config, wallet: &str, signature: &str) -> Result<()> {
    let wallet: WalletAddress = wallet.parse()?;
    let signature = TransactionSignature::from(signature.trim());

    let chain = Arc::new(SolanaRpc::new(&config.rpc));
    let metadata = build_metadata_source(&config.enrichment)?;
    let analyzer = TransactionAnalyzer::new(chain, metadata);

    match analyzer
        .try_analyze(&wallet, &signature)
        .await
        .context("Failed to fetch transaction")?
    {
        Some(event) => {
            print!("{}", render_event(&event));
            println!("\n{}", event.to_json()?);
        }
        None => println!("No trade activity for {} in {}", wallet, signature),
    }

    Ok(())
}

/// Show configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC and price service reachability
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    // Check RPC
    print!("RPC Endpoint... ");
    let rpc = SolanaRpc::new(&config.rpc);
    match rpc.health_check().await {
        Ok(health) => println!("OK (slot {}, {}ms)", health.slot, health.latency_ms),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    // Check price service (if enabled)
    if config.enrichment.enabled {
        print!("Price API... ");
        let client = PriceApiClient::from_config(&config.enrichment)?;
        match client.fetch(PROBE_TOKEN).await {
            Ok(Some(meta)) => println!(
                "OK ({} @ {})",
                meta.symbol.as_deref().unwrap_or("?"),
                meta.price.map(|p| format!("${}", p)).unwrap_or_else(|| "n/a".into())
            ),
            Ok(None) => println!("REACHABLE (no data for probe token)"),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("Price API... DISABLED");
    }

    // Validate watch list
    print!("Watch list... ");
    match config.tracking.wallet_addresses() {
        Ok(wallets) => println!("OK ({} wallets)", wallets.len()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}
