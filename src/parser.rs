//! Transfer log parser
//!
//! Turns the log lines of one transaction into the token transfers made by
//! the watched wallet. Any line containing `Transfer` is a candidate:
//!
//! - `Program log: Instruction: Transfer` / `TransferChecked` are the SPL
//!   token program's instruction markers. They carry no data and are skipped.
//! - Structured records carry `key=value` fields:
//!   `Program log: Transfer mint=<pubkey> amount=<decimal> from=<owner> to=<owner>`.
//!   `token`, `source` and `destination` are accepted as aliases.
//! - Any other candidate is malformed. It is skipped and reported in
//!   [`ParseOutcome::errors`]; it never fails the transaction.
//!
//! Parsing is pure. Enrichment happens afterwards in the analyzer.

use regex::Regex;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::types::{TokenTransfer, TransferDirection, WalletAddress};

/// Substring that marks a log line as a transfer candidate
pub const TRANSFER_TRIGGER: &str = "Transfer";

lazy_static::lazy_static! {
    static ref FIELD_RE: Regex = Regex::new(r"(\w+)=(\S+)").expect("Invalid field regex");
    static ref INSTRUCTION_MARKER_RE: Regex =
        Regex::new(r"Instruction:\s*Transfer(Checked)?\s*$").expect("Invalid marker regex");
}

/// Why a transfer candidate could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no key=value fields in transfer line")]
    NoFields,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid mint address: {0}")]
    InvalidMint(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("negative amount: {0}")]
    NegativeAmount(String),
}

/// A skipped log line and the reason it was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub index: usize,
    pub line: String,
    pub reason: ParseFailure,
}

/// Classification of one log line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not a transfer candidate
    Ignored,
    /// SPL instruction marker with no payload
    Marker,
    /// Well-formed record, but the wallet is not exactly one end of it
    Unattributed,
    /// Transfer attributed to the watched wallet
    Transfer(TokenTransfer),
}

/// Result of parsing one transaction's logs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// Transfers in log order
    pub transfers: Vec<TokenTransfer>,
    /// Malformed candidates
    pub errors: Vec<LineError>,
    /// Markers and records that did not involve the wallet
    pub skipped: usize,
}

/// Parses transfer records relative to one watched wallet
#[derive(Debug, Clone)]
pub struct TransferParser {
    wallet: String,
}

impl TransferParser {
    pub fn new(wallet: &WalletAddress) -> Self {
        Self {
            wallet: wallet.as_base58(),
        }
    }

    /// Parse every log line of a transaction
    pub fn parse_logs<S: AsRef<str>>(&self, logs: &[S]) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for (index, line) in logs.iter().enumerate() {
            let line = line.as_ref();
            match self.parse_line(line) {
                Ok(LineOutcome::Ignored) => {}
                Ok(LineOutcome::Marker) | Ok(LineOutcome::Unattributed) => outcome.skipped += 1,
                Ok(LineOutcome::Transfer(transfer)) => outcome.transfers.push(transfer),
                Err(reason) => outcome.errors.push(LineError {
                    index,
                    line: line.to_string(),
                    reason,
                }),
            }
        }

        outcome
    }

    /// Classify a single log line
    pub fn parse_line(&self, line: &str) -> Result<LineOutcome, ParseFailure> {
        if !line.contains(TRANSFER_TRIGGER) {
            return Ok(LineOutcome::Ignored);
        }

        if INSTRUCTION_MARKER_RE.is_match(line) {
            return Ok(LineOutcome::Marker);
        }

        let fields = extract_fields(line);
        if fields.is_empty() {
            return Err(ParseFailure::NoFields);
        }

        let mint = field(&fields, &["mint", "token"]).ok_or(ParseFailure::MissingField("mint"))?;
        let amount = field(&fields, &["amount"]).ok_or(ParseFailure::MissingField("amount"))?;
        let from = field(&fields, &["from", "source"]).ok_or(ParseFailure::MissingField("from"))?;
        let to = field(&fields, &["to", "destination"]).ok_or(ParseFailure::MissingField("to"))?;

        Pubkey::from_str(mint).map_err(|_| ParseFailure::InvalidMint(mint.to_string()))?;
        let amount = parse_amount(amount)?;

        let direction = match (from == self.wallet, to == self.wallet) {
            (false, true) => TransferDirection::In,
            (true, false) => TransferDirection::Out,
            _ => return Ok(LineOutcome::Unattributed),
        };

        Ok(LineOutcome::Transfer(TokenTransfer::new(mint, amount, direction)))
    }
}

/// Collect `key=value` pairs; the first occurrence of a key wins
fn extract_fields(line: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for cap in FIELD_RE.captures_iter(line) {
        let key = cap[1].to_ascii_lowercase();
        let value = cap[2].trim_end_matches([',', ';']).to_string();
        fields.entry(key).or_insert(value);
    }
    fields
}

fn field<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .map(String::as_str)
}

fn parse_amount(raw: &str) -> Result<Decimal, ParseFailure> {
    let amount = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| ParseFailure::InvalidAmount(raw.to_string()))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ParseFailure::NegativeAmount(raw.to_string()));
    }

    Ok(amount.normalize())
}
