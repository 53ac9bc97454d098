use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::FIRST_DATA_ROW;
use crate::db::SecurityStore;
use crate::error::{AppError, Result, SyncError};
use crate::sheets::{a1, column_letter, SheetsApi};
use crate::state::{normalize_ticker, TickerLocks};
use crate::types::{IndicatorRecord, SheetColumn};

const SHEET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Existing row overwritten in place (1-based sheet row).
    Updated { row: usize },
    Appended,
    /// The record vanished before it could be mirrored.
    Skipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Appended => "appended",
            SyncOutcome::Skipped => "skipped",
        }
    }
}

/// Mirrors local records onto one sheet tab, one row per ticker.
pub struct Reconciler {
    api: Arc<dyn SheetsApi>,
    store: SecurityStore,
    locks: TickerLocks,
    sheet_name: String,
    columns: Vec<SheetColumn>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn SheetsApi>,
        store: SecurityStore,
        sheet_name: String,
        columns: Vec<SheetColumn>,
        timeout: Duration,
    ) -> Result<Self> {
        // Row discovery scans column A, and the write range ends at the last column.
        if columns.first() != Some(&SheetColumn::Ticker) {
            return Err(AppError::Config(
                "sheet layout must be non-empty and start with ticker".to_string(),
            ));
        }
        Ok(Self {
            api,
            store,
            locks: TickerLocks::new(),
            sheet_name,
            columns,
            timeout,
        })
    }

    /// Make the sheet row for `ticker` match the stored record.
    ///
    /// Runs under the ticker's lock so two reconciliations never interleave
    /// their scan and write. The record is re-read inside the lock, so whichever
    /// reconciliation runs last writes the latest state. Never touches local
    /// storage beyond that read.
    ///
    /// The timeout covers the wait for the lock as well as the sync itself.
    pub async fn reconcile(&self, ticker: &str) -> std::result::Result<SyncOutcome, SyncError> {
        let locked = async {
            let _guard = self.locks.acquire(ticker).await;
            self.sync_locked(ticker).await
        };
        let result = match tokio::time::timeout(self.timeout, locked).await {
            Ok(r) => r,
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        };
        self.locks.prune();
        result
    }

    /// Number of tickers with a lock currently registered.
    pub fn locks_tracked(&self) -> usize {
        self.locks.tracked()
    }

    async fn sync_locked(&self, ticker: &str) -> std::result::Result<SyncOutcome, SyncError> {
        let Some(record) = self.store.get(ticker).await? else {
            warn!(ticker, "record missing at sync time, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let identity = normalize_ticker(&record.ticker);
        let ids = self
            .api
            .get_range(&a1(&self.sheet_name, &format!("A{FIRST_DATA_ROW}:A")))
            .await?;
        let found = ids
            .iter()
            .position(|row| row.first().is_some_and(|cell| normalize_ticker(&cell_text(cell)) == identity))
            .map(|i| i + FIRST_DATA_ROW);

        let values = vec![project(&record, &self.columns)];
        let last = column_letter(self.columns.len() - 1);

        match found {
            Some(row) => {
                let range = a1(&self.sheet_name, &format!("A{row}:{last}{row}"));
                debug!(ticker, row, %range, "updating sheet row");
                self.api.update_range(&range, values).await?;
                info!(ticker, row, "sheet row updated");
                Ok(SyncOutcome::Updated { row })
            }
            None => {
                let range = a1(&self.sheet_name, &format!("A:{last}"));
                self.api.append_rows(&range, values).await?;
                info!(ticker, "ticker not in sheet, row appended");
                Ok(SyncOutcome::Appended)
            }
        }
    }
}

/// Sheet row for a record, one cell per layout column. Absent values are
/// written as empty cells so stale content is cleared.
pub fn project(record: &IndicatorRecord, columns: &[SheetColumn]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| match column {
            SheetColumn::Ticker => Value::String(record.ticker.clone()),
            SheetColumn::Indicator(i) => Value::String(record.value(*i).to_string()),
            SheetColumn::AnalystPriceTarget => record
                .analyst_price_target
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(String::new())),
            SheetColumn::DateUpdated => {
                Value::String(record.date_updated.format(SHEET_TIME_FORMAT).to_string())
            }
            SheetColumn::SignalChangedAt => Value::String(
                record
                    .signal_changed_at
                    .map(|t| t.format(SHEET_TIME_FORMAT).to_string())
                    .unwrap_or_default(),
            ),
        })
        .collect()
}

/// Identity cells come back as strings, but numeric tickers may arrive as numbers.
fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::db::test_pool;
    use crate::sheets::testing::MemorySheet;
    use crate::types::{Indicator, IndicatorUpdate, PayloadShape};

    fn update(ticker: &str, indicator: Indicator, value: &str) -> IndicatorUpdate {
        let mut values = BTreeMap::new();
        values.insert(indicator, value.to_string());
        IndicatorUpdate {
            ticker: ticker.to_string(),
            values,
            analyst_price_target: None,
            strength: None,
            comment: None,
            shape: PayloadShape::Single,
            skipped: Vec::new(),
        }
    }

    async fn setup(sheet: Arc<MemorySheet>) -> (SecurityStore, Arc<Reconciler>) {
        let store = SecurityStore::new(test_pool().await);
        let reconciler = Reconciler::new(
            sheet,
            store.clone(),
            "Sheet2".to_string(),
            SheetColumn::default_layout(),
            Duration::from_secs(5),
        )
        .unwrap();
        (store, Arc::new(reconciler))
    }

    #[test]
    fn projection_follows_layout() {
        let mut values = BTreeMap::new();
        values.insert(Indicator::Signal, "buy".to_string());
        values.insert(Indicator::Occ, "sell".to_string());
        let record = IndicatorRecord {
            ticker: "AAPL".into(),
            values,
            analyst_price_target: Some(212.5),
            date_updated: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 5).unwrap(),
            signal_changed_at: None,
        };

        let row = project(&record, &SheetColumn::default_layout());
        assert_eq!(row.len(), 14);
        assert_eq!(row[0], json!("AAPL"));
        assert_eq!(row[1], json!("buy"));
        assert_eq!(row[2], json!(""));
        assert_eq!(row[3], json!("sell"));
        assert_eq!(row[11], json!(212.5));
        assert_eq!(row[12], json!("2025-03-14 09:30:05"));
        assert_eq!(row[13], json!(""));

        let narrow = [SheetColumn::Ticker, SheetColumn::Indicator(Indicator::Occ)];
        assert_eq!(project(&record, &narrow), vec![json!("AAPL"), json!("sell")]);
    }

    #[tokio::test]
    async fn appends_then_updates_in_place() {
        let sheet = Arc::new(MemorySheet::default());
        let (store, reconciler) = setup(Arc::clone(&sheet)).await;

        store.merge(&update("AAPL", Indicator::SmaStrategy, "buy")).await.unwrap();
        assert_eq!(reconciler.reconcile("AAPL").await.unwrap(), SyncOutcome::Appended);

        store.merge(&update("MSFT", Indicator::Occ, "sell")).await.unwrap();
        assert_eq!(reconciler.reconcile("MSFT").await.unwrap(), SyncOutcome::Appended);

        store.merge(&update("AAPL", Indicator::Occ, "hold")).await.unwrap();
        assert_eq!(
            reconciler.reconcile("AAPL").await.unwrap(),
            SyncOutcome::Updated { row: 2 }
        );

        let rows = sheet.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], json!("AAPL"));
        assert_eq!(rows[0][2], json!("buy"));
        assert_eq!(rows[0][3], json!("hold"));
        assert_eq!(rows[1][0], json!("MSFT"));
    }

    #[tokio::test]
    async fn differently_spelled_ticker_reuses_row() {
        let sheet = Arc::new(MemorySheet::default());
        sheet.rows.lock().unwrap().push(vec![json!("OTHER")]);
        sheet.rows.lock().unwrap().push(vec![json!(" aapl ")]);
        let (store, reconciler) = setup(Arc::clone(&sheet)).await;

        store.merge(&update("AAPL", Indicator::Pmax, "buy")).await.unwrap();
        assert_eq!(
            reconciler.reconcile("AAPL").await.unwrap(),
            SyncOutcome::Updated { row: 3 }
        );
        assert_eq!(sheet.snapshot().len(), 2);
        assert_eq!(sheet.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_reconciliations_append_exactly_once() {
        let sheet = Arc::new(MemorySheet::with_delay(Duration::from_millis(20)));
        let (store, reconciler) = setup(Arc::clone(&sheet)).await;
        store.merge(&update("NVDA", Indicator::Signal, "buy")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let r = Arc::clone(&reconciler);
            tasks.push(tokio::spawn(async move { r.reconcile("NVDA").await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let rows = sheet.snapshot();
        let nvda = rows.iter().filter(|r| r[0] == json!("NVDA")).count();
        assert_eq!(nvda, 1);
        assert_eq!(sheet.appends.load(Ordering::SeqCst), 1);
        assert_eq!(sheet.updates.load(Ordering::SeqCst), 7);
        assert_eq!(reconciler.locks_tracked(), 0);
    }

    #[tokio::test]
    async fn missing_record_is_skipped() {
        let sheet = Arc::new(MemorySheet::default());
        let (_store, reconciler) = setup(Arc::clone(&sheet)).await;
        assert_eq!(reconciler.reconcile("GONE").await.unwrap(), SyncOutcome::Skipped);
        assert!(sheet.snapshot().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_leaves_local_state_alone() {
        let sheet = Arc::new(MemorySheet::default());
        sheet.fail.store(true, Ordering::SeqCst);
        let (store, reconciler) = setup(Arc::clone(&sheet)).await;

        store.merge(&update("AMZN", Indicator::Occ, "buy")).await.unwrap();
        let err = reconciler.reconcile("AMZN").await.unwrap_err();
        assert!(matches!(err, SyncError::Unavailable { status: 503, .. }));
        assert_eq!(store.get("AMZN").await.unwrap().unwrap().value(Indicator::Occ), "buy");
    }

    #[tokio::test]
    async fn slow_sheet_times_out() {
        let sheet = Arc::new(MemorySheet::with_delay(Duration::from_secs(5)));
        let store = SecurityStore::new(test_pool().await);
        store.merge(&update("META", Indicator::Occ, "buy")).await.unwrap();
        let reconciler = Reconciler::new(
            sheet,
            store,
            "Sheet2".to_string(),
            SheetColumn::default_layout(),
            Duration::from_millis(50),
        )
        .unwrap();

        let err = reconciler.reconcile("META").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }

    #[tokio::test]
    async fn waiting_on_a_held_lock_counts_against_the_timeout() {
        let sheet = Arc::new(MemorySheet::default());
        let store = SecurityStore::new(test_pool().await);
        store.merge(&update("META", Indicator::Occ, "buy")).await.unwrap();
        let reconciler = Reconciler::new(
            sheet.clone(),
            store,
            "Sheet2".to_string(),
            SheetColumn::default_layout(),
            Duration::from_millis(50),
        )
        .unwrap();

        let held = reconciler.locks.acquire(" meta ").await;
        let err = reconciler.reconcile("META").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert!(sheet.snapshot().is_empty());

        drop(held);
        assert_eq!(reconciler.reconcile("META").await.unwrap(), SyncOutcome::Appended);
        assert_eq!(reconciler.locks_tracked(), 0);
    }

    #[tokio::test]
    async fn layout_must_start_with_ticker() {
        let store = SecurityStore::new(test_pool().await);
        for columns in [Vec::new(), vec![SheetColumn::Indicator(Indicator::Occ)]] {
            let result = Reconciler::new(
                Arc::new(MemorySheet::default()),
                store.clone(),
                "Sheet2".to_string(),
                columns,
                Duration::from_secs(1),
            );
            assert!(matches!(result, Err(AppError::Config(_))));
        }
    }
}
