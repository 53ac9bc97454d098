use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Collapse the spellings of one instrument onto a single identity:
/// trimmed, inner whitespace collapsed, case-folded.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keyed mutual-exclusion registry: normalized ticker → async mutex.
///
/// The map's shard locks only guard lookup and insertion and are released
/// before the per-ticker mutex is awaited, so tickers never block each other.
#[derive(Default)]
pub struct TickerLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TickerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `ticker`. Held until the guard drops.
    pub async fn acquire(&self, ticker: &str) -> OwnedMutexGuard<()> {
        let key = normalize_ticker(ticker);
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits on.
    ///
    /// A handle is only cloned under the shard lock `retain` also takes, so a
    /// count of one means no task can be holding or about to await it.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
