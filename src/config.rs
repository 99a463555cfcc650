//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::types::WalletAddress;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chain RPC connection
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,

    /// Per-call timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries for transient RPC errors (0 = single attempt)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Token price/metadata service
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lookups go to `{base_url}/token/{mint}`
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,

    #[serde(default = "default_enrichment_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How long an unknown token is remembered as unknown
    #[serde(default = "default_miss_ttl_secs")]
    pub miss_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_enrichment_url(),
            timeout_ms: default_enrichment_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            miss_ttl_secs: default_miss_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Watch list and polling behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Wallet addresses to watch (base58)
    #[serde(default)]
    pub wallets: Vec<String>,

    /// Signatures listed per wallet per cycle
    #[serde(default = "default_signature_limit")]
    pub signature_limit: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seen-signature window shared by all wallets
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_restart_initial_delay_ms")]
    pub restart_initial_delay_ms: u64,

    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,

    /// Consecutive monitor restarts before a wallet is given up (0 = never)
    #[serde(default)]
    pub max_restarts: u32,
}

impl TrackingConfig {
    /// Parse the configured wallets in order
    pub fn wallet_addresses(&self) -> crate::error::Result<Vec<WalletAddress>> {
        self.wallets.iter().map(|w| w.parse()).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            signature_limit: default_signature_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            dedup_capacity: default_dedup_capacity(),
            restart_initial_delay_ms: default_restart_initial_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
            max_restarts: 0,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Append-only log file; unset disables file logging
    #[serde(default = "default_log_file")]
    pub file: Option<String>,

    /// Write the file as JSON lines rather than plain text
    #[serde(default = "default_true")]
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            json_file: true,
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

fn default_enrichment_url() -> String {
    "https://price.jup.ag/v4".into()
}

fn default_enrichment_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_miss_ttl_secs() -> u64 {
    15
}

fn default_cache_capacity() -> usize {
    5000
}

fn default_signature_limit() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_restart_initial_delay_ms() -> u64 {
    1000
}

fn default_restart_max_delay_ms() -> u64 {
    60_000
}

fn default_log_file() -> Option<String> {
    Some("smart_wallet_tracker.log".into())
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.max_retries", default_max_retries() as i64)?
            .set_default("tracking.wallets", Vec::<String>::new())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TRACKER_)
            .add_source(
                config::Environment::with_prefix("TRACKER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tracking.wallets")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Watch list
        if self.tracking.wallets.is_empty() {
            anyhow::bail!("tracking.wallets must list at least one wallet");
        }

        let mut unique = HashSet::new();
        for wallet in &self.tracking.wallets {
            let address: WalletAddress = wallet
                .parse()
                .with_context(|| format!("Invalid wallet in tracking.wallets: {}", wallet))?;
            if !unique.insert(address) {
                anyhow::bail!("Duplicate wallet in tracking.wallets: {}", wallet);
            }
        }

        // Polling
        if self.tracking.signature_limit == 0 || self.tracking.signature_limit > 1000 {
            anyhow::bail!("signature_limit must be between 1 and 1000");
        }

        if self.tracking.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }

        let min_dedup = 4 * self.tracking.wallets.len() * self.tracking.signature_limit;
        if self.tracking.dedup_capacity < min_dedup {
            anyhow::bail!(
                "dedup_capacity must be at least {} (4 x wallets x signature_limit), got {}",
                min_dedup,
                self.tracking.dedup_capacity
            );
        }

        if self.tracking.restart_initial_delay_ms == 0
            || self.tracking.restart_initial_delay_ms > self.tracking.restart_max_delay_ms
        {
            anyhow::bail!("restart_initial_delay_ms must be positive and <= restart_max_delay_ms");
        }

        // Timeouts
        if self.rpc.timeout_ms == 0 {
            anyhow::bail!("rpc.timeout_ms must be positive");
        }

        url::Url::parse(&self.rpc.endpoint)
            .with_context(|| format!("Invalid rpc.endpoint: {}", mask_url(&self.rpc.endpoint)))?;

        if self.enrichment.enabled {
            if self.enrichment.timeout_ms == 0 {
                anyhow::bail!("enrichment.timeout_ms must be positive");
            }

            let url = url::Url::parse(&self.enrichment.base_url)
                .with_context(|| format!("Invalid enrichment.base_url: {}", self.enrichment.base_url))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("enrichment.base_url must be http(s), got {}", url.scheme());
            }
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
    max_retries: {}
  Enrichment:
    enabled: {}
    base_url: {}
    timeout: {}ms
    cache_ttl: {}s
  Tracking:
    wallets: {}
    signature_limit: {}
    poll_interval: {}ms
    dedup_capacity: {}
    max_restarts: {}
  Logging:
    file: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.rpc.max_retries,
            self.enrichment.enabled,
            mask_url(&self.enrichment.base_url),
            self.enrichment.timeout_ms,
            self.enrichment.cache_ttl_secs,
            self.tracking.wallets.join(", "),
            self.tracking.signature_limit,
            self.tracking.poll_interval_ms,
            self.tracking.dedup_capacity,
            if self.tracking.max_restarts == 0 {
                "unlimited".to_string()
            } else {
                self.tracking.max_restarts.to_string()
            },
            self.logging.file.as_deref().unwrap_or("(disabled)"),
        )
    }
}

fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
                max_retries: default_max_retries(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
            },
            enrichment: EnrichmentConfig::default(),
            tracking: TrackingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
