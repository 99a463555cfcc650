//! Transaction analyzer
//!
//! signature → fetch → parse → enrich → event. Every failure is logged and
//! collapses to "no event"; nothing propagates to the monitor loop.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::enrichment::TokenMetadataSource;
use crate::error::Result;
use crate::parser::TransferParser;
use crate::rpc::ChainClient;
use crate::types::{
    format_block_time, BalanceChange, NativeTransfer, TokenMetadata, TransactionEvent,
    TransactionSignature, TransferDirection, WalletAddress,
};

/// Native balance changes below this are treated as fee noise
pub const MIN_NATIVE_DELTA_LAMPORTS: u64 = 100_000;

const SOL_DECIMALS: u32 = 9;

pub struct TransactionAnalyzer {
    chain: Arc<dyn ChainClient>,
    metadata: Arc<dyn TokenMetadataSource>,
    malformed_lines: AtomicU64,
}

impl TransactionAnalyzer {
    pub fn new(chain: Arc<dyn ChainClient>, metadata: Arc<dyn TokenMetadataSource>) -> Self {
        Self {
            chain,
            metadata,
            malformed_lines: AtomicU64::new(0),
        }
    }

    /// Transfer log lines skipped as malformed since startup
    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines.load(Ordering::Relaxed)
    }

    /// Analyze one signature for `wallet`.
    ///
    /// `None` when the transaction is missing, failed, has no block time,
    /// yields no transfers, or the fetch errored.
    pub async fn analyze(
        &self,
        wallet: &WalletAddress,
        signature: &TransactionSignature,
    ) -> Option<TransactionEvent> {
        match self.try_analyze(wallet, signature).await {
            Ok(event) => event,
            Err(e) => {
                warn!(wallet = %wallet, signature = %signature, error = %e, "Failed to analyze transaction");
                None
            }
        }
    }

    /// Same as [`analyze`](Self::analyze) but surfaces fetch errors
    pub async fn try_analyze(
        &self,
        wallet: &WalletAddress,
        signature: &TransactionSignature,
    ) -> Result<Option<TransactionEvent>> {
        let Some(tx) = self.chain.get_transaction(signature).await? else {
            debug!(signature = %signature, "Transaction not found");
            return Ok(None);
        };

        if tx.failed {
            debug!(signature = %signature, "Skipping failed transaction");
            return Ok(None);
        }

        let Some((block_time, timestamp)) = tx
            .block_time
            .and_then(|bt| format_block_time(bt).map(|ts| (bt, ts)))
        else {
            debug!(signature = %signature, block_time = ?tx.block_time, "No usable block time");
            return Ok(None);
        };

        let outcome = TransferParser::new(wallet).parse_logs(&tx.log_messages);
        self.malformed_lines
            .fetch_add(outcome.errors.len() as u64, Ordering::Relaxed);
        for error in &outcome.errors {
            warn!(
                wallet = %wallet,
                signature = %signature,
                line = error.index,
                reason = %error.reason,
                "Skipping malformed transfer log line"
            );
        }

        let mut transfers: Vec<_> = outcome
            .transfers
            .into_iter()
            .filter(|t| !t.amount.is_zero())
            .collect();

        if transfers.is_empty() {
            debug!(signature = %signature, skipped = outcome.skipped, "No transfers for wallet");
            return Ok(None);
        }

        let metadata = self.lookup_all(transfers.iter().map(|t| t.token_address.as_str())).await;
        for transfer in &mut transfers {
            if let Some(meta) = metadata.get(&transfer.token_address) {
                transfer.apply_metadata(meta);
            }
        }

        Ok(Some(TransactionEvent {
            wallet: *wallet,
            signature: signature.clone(),
            timestamp,
            block_time,
            token_transfers: transfers,
            sol_transfer: native_transfer(wallet, &tx.balance_changes),
        }))
    }

    /// Look up each distinct token once, concurrently
    async fn lookup_all<'a>(
        &self,
        tokens: impl Iterator<Item = &'a str>,
    ) -> HashMap<String, TokenMetadata> {
        let mut seen = HashSet::new();
        let distinct: Vec<&str> = tokens.filter(|t| seen.insert(*t)).collect();

        let results = join_all(distinct.iter().map(|token| self.metadata.lookup(token))).await;

        distinct
            .into_iter()
            .zip(results)
            .filter_map(|(token, meta)| meta.map(|m| (token.to_string(), m)))
            .collect()
    }
}

/// Native SOL movement of `wallet`, if larger than fee noise
pub fn native_transfer(wallet: &WalletAddress, changes: &[BalanceChange]) -> Option<NativeTransfer> {
    let account = wallet.as_base58();
    let change = changes.iter().find(|c| c.account == account)?;
    let delta = change.delta_lamports();

    if delta.unsigned_abs() < MIN_NATIVE_DELTA_LAMPORTS as u128 {
        return None;
    }

    let direction = if delta > 0 {
        TransferDirection::In
    } else {
        TransferDirection::Out
    };

    Some(NativeTransfer {
        amount_sol: Decimal::from_i128_with_scale(delta.abs(), SOL_DECIMALS).normalize(),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn analyzer(chain: Arc<FakeChain>, metadata: Arc<FakeMetadata>) -> TransactionAnalyzer {
        TransactionAnalyzer::new(chain, metadata)
    }

    #[tokio::test]
    async fn test_one_good_line_one_malformed() {
        let chain = Arc::new(FakeChain::new());
        chain.add_transaction(
            "sig1",
            raw_tx(vec![
                transfer_line(MINT, "5", OTHER, WALLET),
                "Program log: Transfer data=??".to_string(),
            ]),
        );
        let metadata = Arc::new(FakeMetadata::default());
        let analyzer = analyzer(chain, metadata);

        let event = analyzer.analyze(&wallet(), &"sig1".into()).await.unwrap();

        assert_eq!(analyzer.malformed_lines(), 1);
        assert_eq!(event.token_transfers.len(), 1);
        let transfer = &event.token_transfers[0];
        assert_eq!(transfer.token_address, MINT);
        assert_eq!(transfer.amount, Decimal::new(5, 0));
        assert_eq!(transfer.direction, TransferDirection::In);
        assert_eq!(event.timestamp, "2023-11-14 22:13:20");
        assert_eq!(event.block_time, BLOCK_TIME);
    }

    #[tokio::test]
    async fn test_unknown_metadata_keeps_transfer() {
        let chain = Arc::new(FakeChain::new());
        chain.add_transaction("sig1", raw_tx(vec![transfer_line(MINT, "5", OTHER, WALLET)]));
        let metadata = Arc::new(FakeMetadata::default());

        let event = analyzer(chain, metadata.clone())
            .analyze(&wallet(), &"sig1".into())
            .await
            .unwrap();

        assert!(event.token_transfers[0].symbol.is_none());
        assert!(event.token_transfers[0].price.is_none());
        assert_eq!(metadata.lookups(), 1);
    }

    #[tokio::test]
    async fn test_metadata_is_applied_once_per_token() {
        let chain = Arc::new(FakeChain::new());
        chain.add_transaction(
            "sig1",
            raw_tx(vec![
                transfer_line(MINT, "5", OTHER, WALLET),
                transfer_line(MINT, "2", WALLET, OTHER),
            ]),
        );
        let metadata = Arc::new(FakeMetadata::with(
            MINT,
            TokenMetadata {
                symbol: Some("USDC".into()),
                price: Some(Decimal::ONE),
            },
        ));

        let event = analyzer(chain, metadata.clone())
            .analyze(&wallet(), &"sig1".into())
            .await
            .unwrap();

        assert_eq!(event.token_transfers.len(), 2);
        for transfer in &event.token_transfers {
            assert_eq!(transfer.symbol.as_deref(), Some("USDC"));
            assert_eq!(transfer.price, Some(Decimal::ONE));
        }
        assert_eq!(event.token_transfers[1].direction, TransferDirection::Out);
        assert_eq!(metadata.lookups(), 1);
    }

    #[tokio::test]
    async fn test_no_transfers_means_no_event() {
        let chain = Arc::new(FakeChain::new());
        chain.add_transaction(
            "sig1",
            raw_tx(vec![
                "Program log: Instruction: Transfer".to_string(),
                transfer_line(MINT, "0", OTHER, WALLET),
            ]),
        );

        let analyzer = analyzer(chain, Arc::new(FakeMetadata::default()));
        let result = analyzer.analyze(&wallet(), &"sig1".into()).await;
        assert!(result.is_none());
        assert_eq!(analyzer.malformed_lines(), 0);
    }

    #[tokio::test]
    async fn test_missing_failed_and_untimed_transactions() {
        let chain = Arc::new(FakeChain::new());
        let logs = vec![transfer_line(MINT, "5", OTHER, WALLET)];

        let mut failed = raw_tx(logs.clone());
        failed.failed = true;
        chain.add_transaction("failed", failed);

        let mut untimed = raw_tx(logs);
        untimed.block_time = None;
        chain.add_transaction("untimed", untimed);

        let analyzer = analyzer(chain, Arc::new(FakeMetadata::default()));
        assert!(analyzer.analyze(&wallet(), &"missing".into()).await.is_none());
        assert!(analyzer.analyze(&wallet(), &"failed".into()).await.is_none());
        assert!(analyzer.analyze(&wallet(), &"untimed".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_native_transfer_is_attached() {
        let chain = Arc::new(FakeChain::new());
        let mut tx = raw_tx(vec![transfer_line(MINT, "5", OTHER, WALLET)]);
        tx.balance_changes = vec![BalanceChange {
            account: WALLET.to_string(),
            pre_lamports: 2_000_000_000,
            post_lamports: 1_500_000_000,
        }];
        chain.add_transaction("sig1", tx);

        let event = analyzer(chain, Arc::new(FakeMetadata::default()))
            .analyze(&wallet(), &"sig1".into())
            .await
            .unwrap();

        let sol = event.sol_transfer.unwrap();
        assert_eq!(sol.amount_sol, Decimal::new(5, 1));
        assert_eq!(sol.direction, TransferDirection::Out);
    }

    #[test]
    fn test_native_transfer_ignores_fee_noise() {
        let changes = vec![BalanceChange {
            account: WALLET.to_string(),
            pre_lamports: 1_000_000,
            post_lamports: 995_000,
        }];
        assert!(native_transfer(&wallet(), &changes).is_none());

        let incoming = vec![BalanceChange {
            account: WALLET.to_string(),
            pre_lamports: 0,
            post_lamports: 100_000,
        }];
        let sol = native_transfer(&wallet(), &incoming).unwrap();
        assert_eq!(sol.direction, TransferDirection::In);
        assert_eq!(sol.amount_sol, Decimal::new(1, 4));

        assert!(native_transfer(&wallet(), &[]).is_none());
    }
}
