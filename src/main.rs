mod alert;
mod api;
mod config;
mod db;
mod error;
mod sheets;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::SyncLatency;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, SheetsConfig};
use crate::db::SecurityStore;
use crate::error::Result;
use crate::sheets::credentials::{ServiceAccountKey, TokenSource};
use crate::sheets::{GoogleSheetsClient, Reconciler};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);
    let store = SecurityStore::new(pool);

    // --- Sheet mirror ---
    let reconciler = match &cfg.sheets {
        Some(sheets) => Some(Arc::new(build_reconciler(sheets, store.clone())?)),
        None => {
            warn!("SPREADSHEET_ID not set: sheet sync disabled, updates are stored locally only");
            None
        }
    };

    info!(policy = ?cfg.signal_policy, "signal validation policy");

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        reconciler,
        policy: Arc::new(cfg.signal_policy.clone()),
        health: Arc::new(HealthState::new()),
        latency: Arc::new(SyncLatency::new()),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_reconciler(sheets: &SheetsConfig, store: SecurityStore) -> Result<Reconciler> {
    let tokens = match &sheets.access_token {
        Some(token) => {
            info!("using static sheets access token");
            TokenSource::Static(token.clone())
        }
        None => {
            let key = ServiceAccountKey::from_file(&sheets.credentials_path)?;
            info!(client = %key.client_email, path = %sheets.credentials_path, "loaded service account key");
            TokenSource::service_account(key)?
        }
    };
    let client = GoogleSheetsClient::new(&sheets.api_url, &sheets.spreadsheet_id, tokens)?;
    info!(
        spreadsheet = %sheets.spreadsheet_id,
        sheet = %sheets.sheet_name,
        columns = sheets.columns.len(),
        timeout_secs = sheets.sync_timeout_secs,
        "sheet sync enabled"
    );
    Reconciler::new(
        Arc::new(client),
        store,
        sheets.sheet_name.clone(),
        sheets.columns.clone(),
        Duration::from_secs(sheets.sync_timeout_secs),
    )
}
