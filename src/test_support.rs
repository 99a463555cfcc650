//! In-memory collaborators shared by the pipeline tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::enrichment::TokenMetadataSource;
use crate::error::{Error, Result};
use crate::rpc::ChainClient;
use crate::sink::EventSink;
use crate::types::{
    BalanceChange, RawTransaction, SignatureInfo, TokenMetadata, TransactionEvent,
    TransactionSignature, WalletAddress,
};

pub const WALLET: &str = "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK";
pub const OTHER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub const MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const BLOCK_TIME: i64 = 1_700_000_000;

pub fn wallet() -> WalletAddress {
    WALLET.parse().unwrap()
}

pub fn transfer_line(mint: &str, amount: &str, from: &str, to: &str) -> String {
    format!(
        "Program log: Transfer mint={} amount={} from={} to={}",
        mint, amount, from, to
    )
}

pub fn raw_tx(logs: Vec<String>) -> RawTransaction {
    RawTransaction {
        slot: 250_000_000,
        block_time: Some(BLOCK_TIME),
        failed: false,
        log_messages: logs,
        balance_changes: vec![BalanceChange {
            account: WALLET.to_string(),
            pre_lamports: 1_000_000_000,
            post_lamports: 999_995_000,
        }],
    }
}

/// Scripted chain: listings per wallet and transactions per signature
#[derive(Default)]
pub struct FakeChain {
    listings: Mutex<HashMap<WalletAddress, Vec<SignatureInfo>>>,
    transactions: Mutex<HashMap<TransactionSignature, RawTransaction>>,
    fail_listing: AtomicBool,
    panic_listing: AtomicBool,
    list_calls: AtomicUsize,
    fetches: Mutex<Vec<TransactionSignature>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listing(&self, wallet: WalletAddress, signatures: &[&str]) {
        let infos = signatures
            .iter()
            .map(|s| SignatureInfo {
                signature: TransactionSignature::from(*s),
                slot: 250_000_000,
                block_time: Some(BLOCK_TIME),
                failed: false,
            })
            .collect();
        self.listings.lock().unwrap().insert(wallet, infos);
    }

    pub fn add_transaction(&self, signature: &str, tx: RawTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(TransactionSignature::from(signature), tx);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn panic_listing(&self, panic: bool) {
        self.panic_listing.store(panic, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> Vec<TransactionSignature> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn list_recent_signatures(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_listing.load(Ordering::SeqCst) {
            panic!("listing exploded");
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::RpcConnection("connection refused".into()));
        }
        let mut infos = self
            .listings
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_default();
        infos.truncate(limit);
        Ok(infos)
    }

    async fn get_transaction(
        &self,
        signature: &TransactionSignature,
    ) -> Result<Option<RawTransaction>> {
        self.fetches.lock().unwrap().push(signature.clone());
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }
}

/// Metadata source backed by a fixed table
#[derive(Default)]
pub struct FakeMetadata {
    entries: HashMap<String, TokenMetadata>,
    lookups: AtomicUsize,
}

impl FakeMetadata {
    pub fn with(token: &str, metadata: TokenMetadata) -> Self {
        let mut entries = HashMap::new();
        entries.insert(token.to_string(), metadata);
        Self {
            entries,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenMetadataSource for FakeMetadata {
    async fn lookup(&self, token: &str) -> Option<TokenMetadata> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries.get(token).cloned()
    }
}

/// Sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransactionEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &TransactionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
