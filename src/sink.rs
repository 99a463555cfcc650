//! Event sinks
//!
//! Sinks are synchronous and must return quickly; monitors call them inline.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::TransactionEvent;

/// Log target carrying one JSON document per event
pub const EVENTS_TARGET: &str = "smart_wallet_tracker::events";

/// Receives finished transaction events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TransactionEvent);
}

/// Human-readable rendering of an event for the console
pub fn render_event(event: &TransactionEvent) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n🔍 New transaction detected!");
    let _ = writeln!(out, "Wallet:    {}", event.wallet);
    let _ = writeln!(out, "Time:      {} UTC", event.timestamp);
    let _ = writeln!(out, "Signature: {}", event.signature);

    for transfer in &event.token_transfers {
        let _ = writeln!(
            out,
            "{} {} {}",
            transfer.direction.glyph(),
            transfer.amount,
            transfer.symbol.as_deref().unwrap_or("Unknown Token")
        );
        if let Some(price) = transfer.price {
            let _ = writeln!(out, "   price: ${}", price);
        }
    }

    if let Some(sol) = &event.sol_transfer {
        let _ = writeln!(out, "{} {} SOL", sol.direction.glyph(), sol.amount_sol);
    }

    out
}

/// Prints events to stdout and logs their JSON form
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &TransactionEvent) {
        print!("{}", render_event(event));

        match event.to_json() {
            Ok(json) => info!(
                target: EVENTS_TARGET,
                wallet = %event.wallet,
                signature = %event.signature,
                event = %json,
                "New transaction"
            ),
            Err(e) => error!(signature = %event.signature, error = %e, "Failed to serialize event"),
        }
    }
}

/// Forwards events to a bounded channel; never waits for the consumer
pub struct ChannelSink {
    tx: mpsc::Sender<TransactionEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TransactionEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a sink together with its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &TransactionEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            warn!(signature = %event.signature, reason, dropped, "Dropping event");
        }
    }
}

/// Fan-out to several sinks in order
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MultiSink {
    fn emit(&self, event: &TransactionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
