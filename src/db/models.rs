//! Row mapping for the `securities` table.
//! Columns are read by name, so additive migrations do not disturb it.
use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::types::{Indicator, IndicatorRecord};

impl<'r> FromRow<'r, SqliteRow> for IndicatorRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let mut values = BTreeMap::new();
        for indicator in Indicator::ALL {
            let value: String = row.try_get(indicator.column())?;
            values.insert(indicator, value);
        }

        Ok(Self {
            ticker: row.try_get("ticker")?,
            values,
            analyst_price_target: row.try_get("analyst_price_target")?,
            date_updated: row.try_get("date_updated")?,
            signal_changed_at: row.try_get("signal_changed_at")?,
        })
    }
}
