//! Process-wide registry of signatures already handed to the analyzer
//!
//! The set holds a fixed number of signatures and evicts the one checked
//! longest ago once full. A repeat check refreshes a signature, so anything
//! still present in a wallet's listing stays in the window as long as the
//! capacity covers every wallet's listing.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::trace;

use crate::types::TransactionSignature;

struct SeenInner {
    cache: LruCache<TransactionSignature, ()>,
    evicted: u64,
}

/// Bounded set of seen signatures with an atomic check-and-mark
pub struct SeenSignatures {
    inner: Mutex<SeenInner>,
}

impl SeenSignatures {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(SeenInner {
                cache: LruCache::new(capacity),
                evicted: 0,
            }),
        }
    }

    /// Mark `signature` as seen.
    ///
    /// Returns `true` exactly once per signature while it stays in the
    /// window; every later call returns `false` and keeps it there.
    pub fn check_and_mark(&self, signature: &TransactionSignature) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // `get` moves a hit to the most recently used end
        if inner.cache.get(signature).is_some() {
            return false;
        }

        if let Some((oldest, ())) = inner.cache.push(signature.clone(), ()) {
            inner.evicted += 1;
            trace!(signature = %oldest, "Evicted seen signature");
        }
        true
    }

    pub fn contains(&self, signature: &TransactionSignature) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.cache.contains(signature))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache
            .cap()
            .get()
    }

    /// Signatures dropped from the window since startup
    pub fn evicted(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .evicted
    }
}
