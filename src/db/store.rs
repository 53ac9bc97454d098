use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::{debug, info};

use crate::db::transition::{
    self, SignalTransition, CHANGED_FLAG_ASSIGNMENT, CHANGED_FLAG_COLUMN, SIGNAL_CHANGED_AT_ASSIGNMENT,
};
use crate::error::Result;
use crate::types::{IndicatorRecord, IndicatorUpdate};

/// Result of applying one update.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: IndicatorRecord,
    pub transition: SignalTransition,
}

/// Durable per-ticker indicator state in SQLite. The source of truth the sheet
/// mirror is derived from.
#[derive(Clone)]
pub struct SecurityStore {
    pool: SqlitePool,
}

impl SecurityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn merge(&self, update: &IndicatorUpdate) -> Result<MergeOutcome> {
        self.merge_at(update, Utc::now()).await
    }

    /// Column-scoped upsert. Only the columns named by `update` are written;
    /// everything else keeps its stored value (or the table default on insert).
    /// `date_updated` always moves to `now`.
    ///
    /// Runs as one statement, so a multi-signal update is all-or-nothing and
    /// the transition verdict is the one this write produced, even when
    /// another merge for the same ticker commits in the same millisecond.
    pub async fn merge_at(&self, update: &IndicatorUpdate, now: DateTime<Utc>) -> Result<MergeOutcome> {
        // Millisecond precision survives the TEXT round trip unchanged.
        let now = now.trunc_subsecs(3);
        let sql = upsert_sql(update);

        let mut query = sqlx::query(&sql).bind(&update.ticker);
        for value in update.values.values() {
            query = query.bind(value);
        }
        query = query.bind(update.analyst_price_target).bind(now);
        if update.carries_signal() {
            query = query.bind(now).bind(true);
        }

        let row = query.fetch_one(&self.pool).await?;
        let record = IndicatorRecord::from_row(&row)?;
        let changed: bool = row.try_get(CHANGED_FLAG_COLUMN)?;
        let transition = transition::observe(update, &record, changed);

        info!(
            ticker = %record.ticker,
            fields = update.values.len(),
            signal_changed = transition.changed(),
            "indicator state merged"
        );

        Ok(MergeOutcome { record, transition })
    }

    pub async fn get(&self, ticker: &str) -> std::result::Result<Option<IndicatorRecord>, sqlx::Error> {
        sqlx::query_as::<_, IndicatorRecord>("SELECT * FROM securities WHERE ticker = ?")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list(&self) -> Result<Vec<IndicatorRecord>> {
        let rows = sqlx::query_as::<_, IndicatorRecord>("SELECT * FROM securities ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Plain row delete. Returns whether the ticker existed.
    pub async fn delete(&self, ticker: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM securities WHERE ticker = ?")
            .bind(ticker)
            .execute(&self.pool)
            .await?;
        debug!(ticker, rows = result.rows_affected(), "delete");
        Ok(result.rows_affected() > 0)
    }
}

/// Builds the upsert for exactly the columns `update` carries.
///
/// Column names come from the closed `Indicator` type. Placeholders are bound
/// in order: ticker, each value (in `update.values` order), price target,
/// `date_updated`, then `signal_changed_at` and the change flag when the
/// primary signal is present.
fn upsert_sql(update: &IndicatorUpdate) -> String {
    let mut columns: Vec<&str> = vec!["ticker"];
    columns.extend(update.values.keys().map(|i| i.column()));
    columns.push("analyst_price_target");
    columns.push("date_updated");
    if update.carries_signal() {
        columns.push("signal_changed_at");
        columns.push(CHANGED_FLAG_COLUMN);
    }

    let mut assignments: Vec<String> = update
        .values
        .keys()
        .map(|i| format!("{c} = excluded.{c}", c = i.column()))
        .collect();
    assignments.push(
        "analyst_price_target = COALESCE(excluded.analyst_price_target, securities.analyst_price_target)"
            .to_string(),
    );
    assignments.push("date_updated = excluded.date_updated".to_string());
    if update.carries_signal() {
        assignments.push(SIGNAL_CHANGED_AT_ASSIGNMENT.to_string());
        assignments.push(CHANGED_FLAG_ASSIGNMENT.to_string());
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO securities ({}) VALUES ({}) \
         ON CONFLICT(ticker) DO UPDATE SET {} \
         RETURNING *",
        columns.join(", "),
        placeholders,
        assignments.join(", "),
    )
}
