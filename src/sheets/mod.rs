pub mod client;
pub mod credentials;
pub mod reconciler;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;

pub use client::GoogleSheetsClient;
pub use reconciler::{Reconciler, SyncOutcome};

/// Rows of cell values, row-major, as exchanged with the sheet API.
pub type ValueRows = Vec<Vec<Value>>;

/// The three spreadsheet operations the reconciler needs. Ranges are A1
/// notation including the sheet name (`Sheet2!A2:A`).
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn get_range(&self, range: &str) -> Result<ValueRows, SyncError>;

    async fn update_range(&self, range: &str, rows: ValueRows) -> Result<(), SyncError>;

    async fn append_rows(&self, range: &str, rows: ValueRows) -> Result<(), SyncError>;
}

/// Spreadsheet column letter for a zero-based index: 0 → A, 25 → Z, 26 → AA.
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Prefix a cell range with a sheet name, quoting names that need it.
pub fn a1(sheet: &str, cells: &str) -> String {
    if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("{sheet}!{cells}")
    } else {
        format!("'{}'!{cells}", sheet.replace('\'', "''"))
    }
}
