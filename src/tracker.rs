//! Composition root
//!
//! The tracker owns the watch list and the shared collaborators, starts one
//! supervised monitor task per wallet and waits for all of them. A monitor
//! that dies is restarted with exponential backoff and reported as degraded
//! until it completes a clean cycle again.

use dashmap::DashMap;
use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analyzer::TransactionAnalyzer;
use crate::config::{Config, TrackingConfig};
use crate::dedup::SeenSignatures;
use crate::enrichment::build_metadata_source;
use crate::error::{Error, Result};
use crate::monitor::{MonitorContext, MonitorStats, WalletMonitor};
use crate::rpc::{ChainClient, SolanaRpc};
use crate::sink::EventSink;
use crate::types::WalletAddress;

/// Health of one wallet's monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Running,
    /// Monitor died and is being restarted
    Degraded { restarts: u32 },
    /// Cancelled, or gave up after too many restarts
    Stopped,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Running => write!(f, "running"),
            MonitorStatus::Degraded { restarts } => write!(f, "degraded ({} restarts)", restarts),
            MonitorStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Restart policy for dead monitors
#[derive(Debug, Clone, Copy)]
pub struct SupervisionPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive restarts allowed (0 = unlimited)
    pub max_restarts: u32,
}

impl From<&TrackingConfig> for SupervisionPolicy {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.restart_initial_delay_ms),
            max_delay: Duration::from_millis(config.restart_max_delay_ms),
            max_restarts: config.max_restarts,
        }
    }
}

struct WalletHealth {
    status: MonitorStatus,
    /// `cycles_ok` when the status was last set
    since_cycle: u64,
    stats: Arc<MonitorStats>,
}

type HealthRegistry = DashMap<WalletAddress, WalletHealth>;

pub struct Tracker {
    watch_list: Vec<WalletAddress>,
    ctx: MonitorContext,
    policy: SupervisionPolicy,
    health: Arc<HealthRegistry>,
}

impl Tracker {
    pub fn new(watch_list: Vec<WalletAddress>, ctx: MonitorContext, policy: SupervisionPolicy) -> Self {
        let health = DashMap::new();
        for wallet in &watch_list {
            health.insert(
                *wallet,
                WalletHealth {
                    status: MonitorStatus::Running,
                    since_cycle: 0,
                    stats: Arc::new(MonitorStats::default()),
                },
            );
        }

        Self {
            watch_list,
            ctx,
            policy,
            health: Arc::new(health),
        }
    }

    /// Build the Solana RPC handle, metadata source and dedup window from config
    pub fn from_config(config: &Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        let watch_list = config.tracking.wallet_addresses()?;
        if watch_list.is_empty() {
            return Err(Error::Config("no wallets to track".into()));
        }

        let chain: Arc<dyn ChainClient> = Arc::new(SolanaRpc::new(&config.rpc));
        let metadata = build_metadata_source(&config.enrichment)?;

        let ctx = MonitorContext {
            analyzer: Arc::new(TransactionAnalyzer::new(chain.clone(), metadata)),
            chain,
            seen: Arc::new(SeenSignatures::new(config.tracking.dedup_capacity)),
            sink,
            signature_limit: config.tracking.signature_limit,
            poll_interval: config.tracking.poll_interval(),
        };

        Ok(Self::new(watch_list, ctx, SupervisionPolicy::from(&config.tracking)))
    }

    pub fn watch_list(&self) -> &[WalletAddress] {
        &self.watch_list
    }

    pub fn seen(&self) -> &Arc<SeenSignatures> {
        &self.ctx.seen
    }

    pub fn stats(&self, wallet: &WalletAddress) -> Option<Arc<MonitorStats>> {
        self.health.get(wallet).map(|h| h.stats.clone())
    }

    /// Status of every watched wallet, in watch-list order
    pub fn health(&self) -> Vec<(WalletAddress, MonitorStatus)> {
        self.watch_list
            .iter()
            .filter_map(|wallet| {
                let entry = self.health.get(wallet)?;
                let status = match entry.status {
                    MonitorStatus::Degraded { .. } if entry.stats.cycles_ok() > entry.since_cycle => {
                        MonitorStatus::Running
                    }
                    status => status,
                };
                Some((*wallet, status))
            })
            .collect()
    }

    /// Run every monitor until `cancel` fires or all have stopped
    pub async fn run(&self, cancel: CancellationToken) {
        info!(wallets = self.watch_list.len(), "Starting wallet tracker");

        let supervisors = self.watch_list.iter().map(|wallet| {
            supervise(
                *wallet,
                self.ctx.clone(),
                self.policy,
                self.health.clone(),
                cancel.clone(),
            )
        });

        let handles: Vec<_> = supervisors.map(tokio::spawn).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Supervisor task failed");
            }
        }

        info!(
            seen = self.ctx.seen.len(),
            evicted = self.ctx.seen.evicted(),
            "Wallet tracker stopped"
        );
    }
}

fn set_status(health: &HealthRegistry, wallet: &WalletAddress, status: MonitorStatus) {
    if let Some(mut entry) = health.get_mut(wallet) {
        entry.since_cycle = entry.stats.cycles_ok();
        entry.status = status;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn supervise(
    wallet: WalletAddress,
    ctx: MonitorContext,
    policy: SupervisionPolicy,
    health: Arc<HealthRegistry>,
    cancel: CancellationToken,
) {
    let Some(stats) = health.get(&wallet).map(|h| h.stats.clone()) else {
        return;
    };

    let mut delay = policy.initial_delay;
    let mut restarts = 0u32;

    loop {
        let cycles_before = stats.cycles_ok();
        let monitor = WalletMonitor::new(wallet, ctx.clone(), stats.clone());
        let token = cancel.clone();
        let result = tokio::spawn(async move { monitor.run(token).await }).await;

        if cancel.is_cancelled() {
            break;
        }

        let failure = match result {
            Ok(()) => Error::Internal("monitor exited without cancellation".into()),
            Err(e) if e.is_panic() => Error::MonitorPanicked(panic_message(e.into_panic())),
            Err(e) => Error::Internal(e.to_string()),
        };

        // A clean cycle since the last restart resets the backoff
        if stats.cycles_ok() > cycles_before {
            delay = policy.initial_delay;
            restarts = 0;
        }
        restarts += 1;

        if policy.max_restarts > 0 && restarts > policy.max_restarts {
            error!(
                wallet = %wallet,
                attempts = restarts,
                error = %failure,
                "Wallet monitor failed too many times; giving up"
            );
            set_status(&health, &wallet, MonitorStatus::Stopped);
            return;
        }

        set_status(&health, &wallet, MonitorStatus::Degraded { restarts });
        error!(
            wallet = %wallet,
            attempt = restarts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Wallet monitoring degraded; restarting monitor"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = (delay * 2).min(policy.max_delay);
        warn!(wallet = %wallet, attempt = restarts, "Restarting wallet monitor");
    }

    set_status(&health, &wallet, MonitorStatus::Stopped);
}
