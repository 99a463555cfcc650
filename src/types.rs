//! Core types shared across the ingestion pipeline

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Display profile for on-chain block times (always UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A validated wallet address being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(Pubkey);

impl WalletAddress {
    pub fn pubkey(&self) -> &Pubkey {
        &self.0
    }

    /// Base58 form, as it appears in log records and RPC account lists
    pub fn as_base58(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for WalletAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Pubkey::from_str(trimmed)
            .map(WalletAddress)
            .map_err(|e| Error::InvalidWallet {
                address: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(wallet: WalletAddress) -> Self {
        wallet.0.to_string()
    }
}

impl From<Pubkey> for WalletAddress {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one confirmed transaction, used as the dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionSignature(String);

impl TransactionSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionSignature {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionSignature {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of an asset movement relative to the watched wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Received by the wallet
    In,
    /// Sent by the wallet
    Out,
}

impl TransferDirection {
    pub fn glyph(&self) -> &'static str {
        match self {
            TransferDirection::In => "⬇️ IN",
            TransferDirection::Out => "⬆️ OUT",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::In => f.write_str("in"),
            TransferDirection::Out => f.write_str("out"),
        }
    }
}

/// Market metadata for a token, as returned by the price service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub price: Option<Decimal>,
}

impl TokenMetadata {
    pub fn is_empty(&self) -> bool {
        self.symbol.is_none() && self.price.is_none()
    }
}

/// One token movement attributed to the watched wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTransfer {
    /// Token mint address
    pub token_address: String,
    /// Amount in UI units, never negative
    pub amount: Decimal,
    pub direction: TransferDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

impl TokenTransfer {
    pub fn new(token_address: impl Into<String>, amount: Decimal, direction: TransferDirection) -> Self {
        Self {
            token_address: token_address.into(),
            amount,
            direction,
            symbol: None,
            price: None,
        }
    }

    /// Merge enrichment results; fields already present are kept when the
    /// metadata does not carry a replacement.
    pub fn apply_metadata(&mut self, metadata: &TokenMetadata) {
        if let Some(symbol) = &metadata.symbol {
            self.symbol = Some(symbol.clone());
        }
        if let Some(price) = metadata.price {
            self.price = Some(price);
        }
    }
}

/// Native SOL movement of the watched wallet within one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub amount_sol: Decimal,
    pub direction: TransferDirection,
}

/// A finished trade event for one transaction signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub wallet: WalletAddress,
    pub signature: TransactionSignature,
    /// Block time rendered with [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
    /// Raw block time in seconds since epoch
    pub block_time: i64,
    pub token_transfers: Vec<TokenTransfer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sol_transfer: Option<NativeTransfer>,
}

impl TransactionEvent {
    /// Pretty JSON form used for the structured log stream
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Entry returned by a signature listing call
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureInfo {
    pub signature: TransactionSignature,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Transaction landed but its execution failed
    pub failed: bool,
}

/// Lamport balance of one account before and after a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub account: String,
    pub pre_lamports: u64,
    pub post_lamports: u64,
}

impl BalanceChange {
    pub fn delta_lamports(&self) -> i128 {
        self.post_lamports as i128 - self.pre_lamports as i128
    }
}

/// Transaction body as fetched from the chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTransaction {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
    pub log_messages: Vec<String>,
    pub balance_changes: Vec<BalanceChange>,
}

/// Render a block time (seconds since epoch) in the fixed UTC profile.
///
/// Returns `None` for times chrono cannot represent.
pub fn format_block_time(block_time: i64) -> Option<String> {
    DateTime::from_timestamp(block_time, 0).map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}
