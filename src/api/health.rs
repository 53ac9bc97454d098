//! Shared health state for the /health endpoint.
//! Updated by the webhook handler after each merge and reconciliation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared health counters. Updated by request handlers, read by API.
#[derive(Default)]
pub struct HealthState {
    merges_total: AtomicU64,
    syncs_total: AtomicU64,
    sync_failures: AtomicU64,
    /// True until a reconciliation fails; reset by the next success.
    last_sync_ok: AtomicBool,
    /// Millisecond timestamp of the last committed merge (0 = none).
    last_merge_at_ms: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub merges_total: u64,
    pub syncs_total: u64,
    pub sync_failures: u64,
    pub last_sync_ok: bool,
    pub last_merge_at_ms: Option<u64>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            last_sync_ok: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn record_merge(&self, at_ms: u64) {
        self.merges_total.fetch_add(1, Ordering::Relaxed);
        self.last_merge_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn record_sync(&self, ok: bool) {
        self.syncs_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.sync_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_sync_ok.store(ok, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_merge_at_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            merges_total: self.merges_total.load(Ordering::Relaxed),
            syncs_total: self.syncs_total.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            last_sync_ok: self.last_sync_ok.load(Ordering::Relaxed),
            last_merge_at_ms: (last != 0).then_some(last),
        }
    }
}
