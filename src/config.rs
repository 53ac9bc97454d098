use crate::error::{AppError, Result};
use crate::types::{SheetColumn, SignalPolicy};

pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Tab that mirrors the `securities` table.
pub const DEFAULT_SHEET_NAME: &str = "Sheet2";

/// First data row of the sheet. Row 1 holds the human-maintained header.
pub const FIRST_DATA_ROW: usize = 2;

/// Upper bound for one reconciliation (lock wait excluded), in seconds.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 10;

/// Per-request timeout of the Sheets HTTP client, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Access tokens are refreshed this many seconds before they expire.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// SQLite busy timeout so concurrent upserts wait instead of failing.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_ALLOWED_SIGNALS: &str = "buy,sell,hold";

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub api_url: String,
    pub columns: Vec<SheetColumn>,
    pub credentials_path: String,
    /// Static bearer token (SHEETS_ACCESS_TOKEN). Skips the service account exchange.
    pub access_token: Option<String>,
    pub sync_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub signal_policy: SignalPolicy,
    /// None when SPREADSHEET_ID is unset: the sheet mirror is disabled.
    pub sheets: Option<SheetsConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sheets = match std::env::var("SPREADSHEET_ID") {
            Ok(id) if !id.trim().is_empty() => Some(SheetsConfig {
                spreadsheet_id: id.trim().to_string(),
                sheet_name: std::env::var("SHEET_NAME")
                    .unwrap_or_else(|_| DEFAULT_SHEET_NAME.to_string()),
                api_url: std::env::var("SHEETS_API_URL")
                    .unwrap_or_else(|_| SHEETS_API_URL.to_string()),
                columns: match std::env::var("SHEET_COLUMNS") {
                    Ok(raw) if !raw.trim().is_empty() => parse_sheet_columns(&raw)?,
                    _ => SheetColumn::default_layout(),
                },
                credentials_path: std::env::var("GOOGLE_CREDENTIALS_PATH")
                    .unwrap_or_else(|_| "credentials.json".to_string()),
                access_token: std::env::var("SHEETS_ACCESS_TOKEN")
                    .ok()
                    .filter(|t| !t.trim().is_empty()),
                sync_timeout_secs: std::env::var("SHEET_SYNC_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_SYNC_TIMEOUT_SECS.to_string())
                    .parse::<u64>()
                    .map_err(|_| {
                        AppError::Config("SHEET_SYNC_TIMEOUT_SECS must be a whole number of seconds".to_string())
                    })?,
            }),
            _ => None,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "stockmomentum.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            signal_policy: parse_signal_policy(
                &std::env::var("SIGNAL_POLICY").unwrap_or_else(|_| "free_text".to_string()),
                &std::env::var("ALLOWED_SIGNALS")
                    .unwrap_or_else(|_| DEFAULT_ALLOWED_SIGNALS.to_string()),
            )?,
            sheets,
        })
    }
}

/// `free_text` or `enumerated`; the latter restricted to the comma-separated `allowed` list.
pub fn parse_signal_policy(policy: &str, allowed: &str) -> Result<SignalPolicy> {
    match policy.trim().to_ascii_lowercase().as_str() {
        "free_text" | "freetext" | "" => Ok(SignalPolicy::FreeText),
        "enumerated" | "enum" => {
            let values: Vec<String> = allowed
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if values.is_empty() {
                return Err(AppError::Config(
                    "ALLOWED_SIGNALS must list at least one value when SIGNAL_POLICY=enumerated".to_string(),
                ));
            }
            Ok(SignalPolicy::Enumerated(values))
        }
        other => Err(AppError::Config(format!(
            "SIGNAL_POLICY must be free_text or enumerated, got {other:?}"
        ))),
    }
}

/// Comma-separated record field names. `ticker` must come first, since row
/// discovery scans column A.
pub fn parse_sheet_columns(raw: &str) -> Result<Vec<SheetColumn>> {
    let mut columns = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let column = name
            .parse::<SheetColumn>()
            .map_err(|n| AppError::Config(format!("SHEET_COLUMNS: unknown column {n:?}")))?;
        if columns.contains(&column) {
            return Err(AppError::Config(format!(
                "SHEET_COLUMNS: duplicate column {}",
                column.name()
            )));
        }
        columns.push(column);
    }
    if columns.first() != Some(&SheetColumn::Ticker) {
        return Err(AppError::Config("SHEET_COLUMNS must start with ticker".to_string()));
    }
    Ok(columns)
}
