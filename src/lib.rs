//! Smart Wallet Tracker Library
//!
//! Polls Solana wallets for new transactions, extracts their token
//! transfers, enriches them with price data and emits trade events.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod monitor;
pub mod parser;
pub mod rpc;
pub mod sink;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use tracker::{MonitorStatus, Tracker};
pub use types::{TokenTransfer, TransactionEvent, TransactionSignature, TransferDirection, WalletAddress};
