//! Chain access for the tracker
//!
//! [`ChainClient`] is the seam the monitors and analyzer talk to.
//! [`SolanaRpc`] implements it over the nonblocking Solana JSON-RPC client.
//! `Ok(None)` from `get_transaction` means "not found"; `Err` means the call
//! itself failed.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde_json::json;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiLoadedAddresses, UiMessage,
    UiTransactionEncoding,
};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::types::{
    BalanceChange, RawTransaction, SignatureInfo, TransactionSignature, WalletAddress,
};

/// Read-only chain access needed by the tracker
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Most recent signatures for a wallet, newest first, at most `limit`
    async fn list_recent_signatures(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Fetch a confirmed transaction; `Ok(None)` when the node does not know it
    async fn get_transaction(&self, signature: &TransactionSignature)
        -> Result<Option<RawTransaction>>;
}

/// Result of an RPC health probe
#[derive(Debug, Clone)]
pub struct RpcHealth {
    pub slot: u64,
    pub latency_ms: u64,
}

/// Solana JSON-RPC implementation of [`ChainClient`]
pub struct SolanaRpc {
    client: RpcClient,
    timeout_ms: u64,
    retry: RetryPolicy,
}

impl SolanaRpc {
    pub fn new(config: &RpcConfig) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            CommitmentConfig::confirmed(),
        );

        Self {
            client,
            timeout_ms: config.timeout_ms,
            retry: RetryPolicy::from(config),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    /// Current slot and round-trip latency
    pub async fn health_check(&self) -> Result<RpcHealth> {
        let start = Instant::now();
        let slot = self
            .client
            .get_slot()
            .await
            .map_err(|e| self.classify(e))?;

        Ok(RpcHealth {
            slot,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn classify(&self, e: ClientError) -> Error {
        match e.kind() {
            ClientErrorKind::Reqwest(inner) if inner.is_timeout() => Error::RpcTimeout(self.timeout_ms),
            ClientErrorKind::Reqwest(inner) if inner.is_connect() => {
                Error::RpcConnection(e.to_string())
            }
            ClientErrorKind::SerdeJson(_) => Error::Serialization(e.to_string()),
            _ => Error::Rpc(e.to_string()),
        }
    }
}

/// Retry budget for transient RPC failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Overall budget; covers a timed-out attempt plus every retry
    pub max_elapsed: Duration,
}

impl From<&RpcConfig> for RetryPolicy {
    fn from(config: &RpcConfig) -> Self {
        let attempts = u64::from(config.max_retries) + 1;
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_elapsed: Duration::from_millis(config.timeout_ms.saturating_mul(attempts)),
        }
    }
}

/// Run an RPC call, retrying transient failures up to `max_retries` times
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let schedule = ExponentialBackoff {
        initial_interval: policy.base_delay,
        max_interval: policy.base_delay * 8,
        max_elapsed_time: Some(policy.max_elapsed),
        ..Default::default()
    };

    let attempts = AtomicU32::new(0);
    let max_retries = policy.max_retries;

    retry(schedule, || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let fut = call();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt <= max_retries => {
                    warn!(operation, attempt, error = %e, "Retryable RPC error");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

#[async_trait]
impl ChainClient for SolanaRpc {
    async fn list_recent_signatures(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let rpc = self;
        let statuses = with_retry(&self.retry, "getSignaturesForAddress", || async move {
            let config = GetConfirmedSignaturesForAddress2Config {
                limit: Some(limit),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            };
            rpc.client
                .get_signatures_for_address_with_config(wallet.pubkey(), config)
                .await
                .map_err(|e| rpc.classify(e))
        })
        .await?;

        debug!(wallet = %wallet, count = statuses.len(), "Listed signatures");

        Ok(statuses
            .into_iter()
            .map(|s| SignatureInfo {
                signature: TransactionSignature::new(s.signature),
                slot: s.slot,
                block_time: s.block_time,
                failed: s.err.is_some(),
            })
            .collect())
    }

    async fn get_transaction(
        &self,
        signature: &TransactionSignature,
    ) -> Result<Option<RawTransaction>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        let params = json!([signature.as_str(), config]);
        let rpc = self;
        let encoded: Option<EncodedConfirmedTransactionWithStatusMeta> =
            with_retry(&self.retry, "getTransaction", || {
                let params = params.clone();
                async move {
                    rpc.client
                        .send(RpcRequest::GetTransaction, params)
                        .await
                        .map_err(|e| rpc.classify(e))
                }
            })
            .await?;

        Ok(encoded.map(raw_transaction_from_encoded))
    }
}

/// Flatten an RPC transaction into the fields the analyzer needs
pub fn raw_transaction_from_encoded(tx: EncodedConfirmedTransactionWithStatusMeta) -> RawTransaction {
    let mut account_keys = match &tx.transaction.transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Raw(raw) => raw.account_keys.clone(),
            UiMessage::Parsed(parsed) => {
                parsed.account_keys.iter().map(|a| a.pubkey.clone()).collect()
            }
        },
        EncodedTransaction::Accounts(list) => {
            list.account_keys.iter().map(|a| a.pubkey.clone()).collect()
        }
        _ => Vec::new(),
    };

    let Some(meta) = tx.transaction.meta else {
        return RawTransaction {
            slot: tx.slot,
            block_time: tx.block_time,
            ..Default::default()
        };
    };

    // Balances are indexed over static keys followed by loaded addresses
    if let Some(UiLoadedAddresses { writable, readonly }) =
        Option::<UiLoadedAddresses>::from(meta.loaded_addresses)
    {
        account_keys.extend(writable);
        account_keys.extend(readonly);
    }

    let balance_changes = account_keys
        .into_iter()
        .zip(meta.pre_balances.iter().zip(meta.post_balances.iter()))
        .map(|(account, (pre, post))| BalanceChange {
            account,
            pre_lamports: *pre,
            post_lamports: *post,
        })
        .collect();

    RawTransaction {
        slot: tx.slot,
        block_time: tx.block_time,
        failed: meta.err.is_some(),
        log_messages: Option::<Vec<String>>::from(meta.log_messages).unwrap_or_default(),
        balance_changes,
    }
}
