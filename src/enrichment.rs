//! Token metadata enrichment
//!
//! Looks up symbol and price for a token mint from the price service.
//! Lookups never fail past this module: any network, status or decode
//! problem is logged and reported as "unknown" (`None`).

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::error::{Error, Result};
use crate::types::TokenMetadata;

/// Source of token market metadata
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    /// Metadata for a token, or `None` when unknown or unavailable
    async fn lookup(&self, token_address: &str) -> Option<TokenMetadata>;
}

/// HTTP client for the price service (`GET {base_url}/token/{mint}`)
pub struct PriceApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl PriceApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn token_url(&self, token_address: &str) -> String {
        format!("{}/token/{}", self.base_url, token_address)
    }

    /// Single lookup that surfaces transport and decode errors.
    ///
    /// Non-200 responses are `Ok(None)`.
    pub async fn fetch(&self, token_address: &str) -> Result<Option<TokenMetadata>> {
        let url = self.token_url(token_address);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("request to {} failed: {}", url, e)))?;

        if response.status() != StatusCode::OK {
            debug!(
                token = %token_address,
                status = %response.status(),
                "Price service has no data for token"
            );
            return Ok(None);
        }

        let body: TokenInfoResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse price response: {}", e)))?;

        let metadata = body.into_metadata();
        Ok((!metadata.is_empty()).then_some(metadata))
    }
}

#[async_trait]
impl TokenMetadataSource for PriceApiClient {
    async fn lookup(&self, token_address: &str) -> Option<TokenMetadata> {
        match self.fetch(token_address).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(token = %token_address, error = %e, "Token metadata lookup failed");
                None
            }
        }
    }
}

/// Source used when enrichment is switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMetadata;

#[async_trait]
impl TokenMetadataSource for DisabledMetadata {
    async fn lookup(&self, _token_address: &str) -> Option<TokenMetadata> {
        None
    }
}

// ============ Price service response ============

#[derive(Debug, Default, Deserialize)]
struct TokenInfoResponse {
    #[serde(default, alias = "mintSymbol")]
    symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    price: Option<Decimal>,
    /// Some deployments wrap the payload in `data`
    #[serde(default)]
    data: Option<Box<TokenInfoResponse>>,
}

impl TokenInfoResponse {
    fn into_metadata(self) -> TokenMetadata {
        let nested = self.data.map(|d| d.into_metadata()).unwrap_or_default();
        TokenMetadata {
            symbol: self.symbol.filter(|s| !s.is_empty()).or(nested.symbol),
            price: self.price.or(nested.price),
        }
    }
}

/// Accept prices as JSON numbers or numeric strings; anything else is absent
fn lenient_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }))
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

// ============ Cache ============

/// Settings for [`CachedMetadataSource`]
#[derive(Debug, Clone)]
pub struct MetadataCacheConfig {
    /// Maximum cached tokens
    pub capacity: usize,
    /// TTL for successful lookups
    pub ttl: Duration,
    /// TTL for unknown results
    pub miss_ttl: Duration,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 5_000,
            ttl: Duration::from_secs(60),
            miss_ttl: Duration::from_secs(15),
        }
    }
}

impl From<&EnrichmentConfig> for MetadataCacheConfig {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            capacity: config.cache_capacity,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            miss_ttl: Duration::from_secs(config.miss_ttl_secs),
        }
    }
}

#[derive(Clone)]
struct CachedMetadata {
    metadata: Option<TokenMetadata>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedMetadata {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// TTL cache in front of another metadata source
pub struct CachedMetadataSource<S> {
    inner: S,
    config: MetadataCacheConfig,
    entries: DashMap<String, CachedMetadata>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: TokenMetadataSource> CachedMetadataSource<S> {
    pub fn new(inner: S, config: MetadataCacheConfig) -> Self {
        Self {
            inner,
            entries: DashMap::with_capacity(config.capacity.min(1024)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn get_cached(&self, token_address: &str) -> Option<Option<TokenMetadata>> {
        if let Some(entry) = self.entries.get(token_address) {
            if !entry.is_expired() {
                return Some(entry.metadata.clone());
            }
            drop(entry);
            self.entries.remove(token_address);
        }
        None
    }

    fn store(&self, token_address: &str, metadata: Option<TokenMetadata>) {
        if self.config.capacity == 0 {
            return;
        }

        // Evict ~10% when full
        if self.entries.len() >= self.config.capacity {
            let to_remove = (self.config.capacity / 10).max(1);
            let keys: Vec<_> = self
                .entries
                .iter()
                .take(to_remove)
                .map(|r| r.key().clone())
                .collect();
            for key in keys {
                self.entries.remove(&key);
            }
        }

        let ttl = if metadata.is_some() {
            self.config.ttl
        } else {
            self.config.miss_ttl
        };

        self.entries.insert(
            token_address.to_string(),
            CachedMetadata {
                metadata,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[async_trait]
impl<S: TokenMetadataSource> TokenMetadataSource for CachedMetadataSource<S> {
    async fn lookup(&self, token_address: &str) -> Option<TokenMetadata> {
        if let Some(cached) = self.get_cached(token_address) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let metadata = self.inner.lookup(token_address).await;
        self.store(token_address, metadata.clone());
        metadata
    }
}

/// Build the metadata source described by the config
pub fn build_metadata_source(config: &EnrichmentConfig) -> Result<Arc<dyn TokenMetadataSource>> {
    if !config.enabled {
        debug!("Token enrichment disabled");
        return Ok(Arc::new(DisabledMetadata));
    }

    let client = PriceApiClient::from_config(config)?;
    Ok(Arc::new(CachedMetadataSource::new(
        client,
        MetadataCacheConfig::from(config),
    )))
}
