//! Per-wallet polling loop
//!
//! Each cycle lists recent signatures, admits the unseen ones through the
//! shared [`SeenSignatures`] set, analyzes them in listing order and forwards
//! events to the sink. Failed cycles are logged and the loop carries on
//! after the usual pause.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::TransactionAnalyzer;
use crate::dedup::SeenSignatures;
use crate::error::Result;
use crate::rpc::ChainClient;
use crate::sink::EventSink;
use crate::types::WalletAddress;

/// Collaborators shared by every monitor
#[derive(Clone)]
pub struct MonitorContext {
    pub chain: Arc<dyn ChainClient>,
    pub analyzer: Arc<TransactionAnalyzer>,
    pub seen: Arc<SeenSignatures>,
    pub sink: Arc<dyn EventSink>,
    pub signature_limit: usize,
    pub poll_interval: Duration,
}

/// Counters for one wallet, kept across monitor restarts
#[derive(Debug, Default)]
pub struct MonitorStats {
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    analyzed: AtomicU64,
    events: AtomicU64,
}

impl MonitorStats {
    pub fn cycles_ok(&self) -> u64 {
        self.cycles_ok.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn analyzed(&self) -> u64 {
        self.analyzed.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

/// What one polling cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub admitted: usize,
    pub events: usize,
}

pub struct WalletMonitor {
    wallet: WalletAddress,
    ctx: MonitorContext,
    stats: Arc<MonitorStats>,
}

impl WalletMonitor {
    pub fn new(wallet: WalletAddress, ctx: MonitorContext, stats: Arc<MonitorStats>) -> Self {
        Self { wallet, ctx, stats }
    }

    pub fn wallet(&self) -> &WalletAddress {
        &self.wallet
    }

    /// Poll until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(wallet = %self.wallet, "Monitoring wallet");

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_cycle() => result,
            };

            match result {
                Ok(report) => {
                    self.stats.cycles_ok.fetch_add(1, Ordering::Relaxed);
                    if report.admitted > 0 {
                        debug!(
                            wallet = %self.wallet,
                            listed = report.listed,
                            admitted = report.admitted,
                            events = report.events,
                            "Cycle complete"
                        );
                    }
                }
                Err(e) => {
                    self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(wallet = %self.wallet, error = %e, "Polling cycle failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
            }
        }

        info!(wallet = %self.wallet, "Stopped monitoring wallet");
    }

    /// One list → filter → analyze → forward pass
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let listing = self
            .ctx
            .chain
            .list_recent_signatures(&self.wallet, self.ctx.signature_limit)
            .await?;

        let mut report = CycleReport {
            listed: listing.len(),
            ..Default::default()
        };

        for info in listing {
            if !self.ctx.seen.check_and_mark(&info.signature) {
                continue;
            }
            report.admitted += 1;

            if info.failed {
                debug!(wallet = %self.wallet, signature = %info.signature, "Skipping failed transaction");
                continue;
            }

            self.stats.analyzed.fetch_add(1, Ordering::Relaxed);
            if let Some(event) = self.ctx.analyzer.analyze(&self.wallet, &info.signature).await {
                self.ctx.sink.emit(&event);
                self.stats.events.fetch_add(1, Ordering::Relaxed);
                report.events += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{PriceApiClient, TokenMetadataSource};
    use crate::test_support::*;
    use crate::types::{TransactionSignature, TransferDirection};
    use rust_decimal::Decimal;

    struct Harness {
        chain: Arc<FakeChain>,
        sink: Arc<RecordingSink>,
        monitor: WalletMonitor,
    }

    fn harness_with(metadata: Arc<dyn TokenMetadataSource>) -> Harness {
        harness_sharing(metadata, Arc::new(SeenSignatures::new(100)))
    }

    fn harness_sharing(metadata: Arc<dyn TokenMetadataSource>, seen: Arc<SeenSignatures>) -> Harness {
        let chain = Arc::new(FakeChain::new());
        let sink = Arc::new(RecordingSink::default());
        let ctx = MonitorContext {
            chain: chain.clone(),
            analyzer: Arc::new(TransactionAnalyzer::new(chain.clone(), metadata)),
            seen,
            sink: sink.clone(),
            signature_limit: 10,
            poll_interval: Duration::from_millis(10),
        };
        let monitor = WalletMonitor::new(wallet(), ctx, Arc::new(MonitorStats::default()));
        Harness { chain, sink, monitor }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FakeMetadata::default()))
    }

    #[tokio::test]
    async fn test_empty_history_is_a_quiet_cycle() {
        let h = harness();

        let report = h.monitor.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(h.chain.fetches().is_empty());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_drop_good_transfer() {
        let h = harness();
        h.chain.set_listing(wallet(), &["sig1"]);
        h.chain.add_transaction(
            "sig1",
            raw_tx(vec![
                transfer_line(MINT, "5", OTHER, WALLET),
                "Program log: Transfer amount=oops".to_string(),
            ]),
        );

        let report = h.monitor.run_cycle().await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(h.monitor.ctx.analyzer.malformed_lines(), 1);

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_transfers.len(), 1);
        assert_eq!(events[0].token_transfers[0].amount, Decimal::new(5, 0));
        assert_eq!(events[0].token_transfers[0].direction, TransferDirection::In);
    }

    #[tokio::test]
    async fn test_unreachable_enrichment_still_emits() {
        let client = PriceApiClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let h = harness_with(Arc::new(client));
        h.chain.set_listing(wallet(), &["sig1"]);
        h.chain.add_transaction("sig1", raw_tx(vec![transfer_line(MINT, "5", OTHER, WALLET)]));

        h.monitor.run_cycle().await.unwrap();

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].token_transfers[0].symbol.is_none());
        assert!(events[0].token_transfers[0].price.is_none());
    }

    #[tokio::test]
    async fn test_repeated_signature_is_analyzed_once() {
        let h = harness();
        h.chain.set_listing(wallet(), &["sig1"]);
        h.chain.add_transaction("sig1", raw_tx(vec![transfer_line(MINT, "5", OTHER, WALLET)]));

        let first = h.monitor.run_cycle().await.unwrap();
        let second = h.monitor.run_cycle().await.unwrap();

        assert_eq!(first.admitted, 1);
        assert_eq!(second.admitted, 0);
        assert_eq!(second.listed, 1);
        assert_eq!(h.chain.fetches().len(), 1);
        assert_eq!(h.sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_listed_signature_survives_churn_from_other_wallets() {
        // Smallest window validation accepts for one wallet listing 10
        let seen = Arc::new(SeenSignatures::new(40));
        let h = harness_sharing(Arc::new(FakeMetadata::default()), seen.clone());
        h.chain.set_listing(wallet(), &["quiet"]);
        h.chain.add_transaction("quiet", raw_tx(vec![transfer_line(MINT, "5", OTHER, WALLET)]));

        for n in 0..40 {
            h.monitor.run_cycle().await.unwrap();
            assert!(seen.check_and_mark(&TransactionSignature::new(format!("busy{}", n))));
        }
        let last = h.monitor.run_cycle().await.unwrap();

        assert!(seen.evicted() > 0);
        assert_eq!(last.admitted, 0);
        assert_eq!(h.chain.fetches().len(), 1);
        assert_eq!(h.sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_unanalyzable_signature_is_not_retried() {
        let h = harness();
        h.chain.set_listing(wallet(), &["ghost"]);

        h.monitor.run_cycle().await.unwrap();
        h.monitor.run_cycle().await.unwrap();

        assert_eq!(h.chain.fetches().len(), 1);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_listing_order_is_preserved() {
        let h = harness();
        h.chain.set_listing(wallet(), &["newest", "older"]);
        h.chain.add_transaction("newest", raw_tx(vec![transfer_line(MINT, "2", OTHER, WALLET)]));
        h.chain.add_transaction("older", raw_tx(vec![transfer_line(MINT, "1", OTHER, WALLET)]));

        h.monitor.run_cycle().await.unwrap();

        let order: Vec<_> = h.chain.fetches().iter().map(|s| s.to_string()).collect();
        assert_eq!(order, vec!["newest", "older"]);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_loop_alive() {
        let h = harness();
        h.chain.fail_listing(true);
        assert!(h.monitor.run_cycle().await.is_err());

        let cancel = CancellationToken::new();
        let stats = h.monitor.stats.clone();
        let chain = h.chain.clone();
        let monitor = h.monitor;
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        chain.fail_listing(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(stats.cycles_failed() >= 1);
        assert!(stats.cycles_ok() >= 1);
        assert!(chain.list_calls() >= 3);
    }
}
