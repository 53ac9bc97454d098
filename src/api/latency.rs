//! In-memory latency histogram for sheet reconciliation.
//! Measures lock wait plus the scan-and-write round trips of each sync.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared sync latency stats. Webhook handler records, API reads.
/// Values stored in microseconds.
pub struct SyncLatency {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Serialize)]
pub struct LatencyReport {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl SyncLatency {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 100_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn report(&self) -> LatencyReport {
        let Ok(h) = self.inner.lock() else {
            return LatencyReport { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None };
        };
        if h.len() == 0 {
            return LatencyReport { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None };
        }
        let ms = |q: f64| Some(h.value_at_quantile(q) as f64 / 1000.0);
        LatencyReport {
            samples: h.len(),
            p50_ms: ms(0.5),
            p95_ms: ms(0.95),
            p99_ms: ms(0.99),
        }
    }
}

impl Default for SyncLatency {
    fn default() -> Self {
        Self::new()
    }
}
