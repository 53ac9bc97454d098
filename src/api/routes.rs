use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::alert::normalize;
use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyReport, SyncLatency};
use crate::db::SecurityStore;
use crate::error::AppError;
use crate::sheets::Reconciler;
use crate::types::{Indicator, IndicatorRecord, SignalPolicy, SkippedSignal};

#[derive(Clone)]
pub struct ApiState {
    pub store: SecurityStore,
    /// None when no spreadsheet is configured.
    pub reconciler: Option<Arc<Reconciler>>,
    pub policy: Arc<SignalPolicy>,
    pub health: Arc<HealthState>,
    pub latency: Arc<SyncLatency>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/webhook", get(list_securities).post(post_webhook))
        .route("/webhook/:ticker", delete(delete_security))
        .route("/health", get(get_health))
        .route("/stats/sync", get(get_stats_sync))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub ticker: String,
    pub applied: Vec<Indicator>,
    pub skipped: Vec<SkippedSignal>,
    pub signal_transition: bool,
    pub sync: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sync_enabled: bool,
    pub ticker_locks: usize,
    #[serde(flatten)]
    pub counters: HealthSnapshot,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Normalize, merge, then mirror to the sheet. The body is read as raw bytes
/// because alert senders often label JSON as `text/plain`.
async fn post_webhook(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let raw: Value = serde_json::from_slice(&body)?;
    let update = normalize(&raw, &state.policy)?;

    let outcome = state.store.merge(&update).await?;
    state
        .health
        .record_merge(outcome.record.date_updated.timestamp_millis().max(0) as u64);

    let sync = match &state.reconciler {
        None => "disabled",
        Some(reconciler) => {
            let started = Instant::now();
            let result = reconciler.reconcile(&update.ticker).await;
            state.latency.record(started.elapsed());
            state.health.record_sync(result.is_ok());
            match result {
                Ok(o) => o.as_str(),
                Err(e) => {
                    error!(ticker = %update.ticker, error = %e, "sheet sync failed after local commit");
                    return Err(e.into());
                }
            }
        }
    };

    info!(
        ticker = %update.ticker,
        shape = ?update.shape,
        applied = update.values.len(),
        skipped = update.skipped.len(),
        strength = ?update.strength,
        comment = update.comment.as_deref().unwrap_or(""),
        sync,
        "webhook processed"
    );

    Ok(Json(WebhookResponse {
        status: "ok",
        message: "Webhook processed successfully",
        ticker: update.ticker,
        applied: update.values.into_keys().collect(),
        skipped: update.skipped,
        signal_transition: outcome.transition.changed(),
        sync,
    }))
}

async fn list_securities(
    State(state): State<ApiState>,
) -> Result<Json<Vec<IndicatorRecord>>, AppError> {
    Ok(Json(state.store.list().await?))
}

async fn delete_security(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.store.delete(&ticker).await? {
        return Err(AppError::NotFound(format!("ticker {ticker}")));
    }
    info!(%ticker, "security deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sync_enabled: state.reconciler.is_some(),
        ticker_locks: state.reconciler.as_ref().map_or(0, |r| r.locks_tracked()),
        counters: state.health.snapshot(),
    })
}

async fn get_stats_sync(State(state): State<ApiState>) -> Json<LatencyReport> {
    Json(state.latency.report())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::db::test_pool;
    use crate::sheets::testing::MemorySheet;
    use crate::types::SheetColumn;

    async fn app_with(sheet: Option<Arc<MemorySheet>>) -> (Router, SecurityStore) {
        let store = SecurityStore::new(test_pool().await);
        let reconciler = sheet.map(|s| {
            Arc::new(Reconciler::new(
                s,
                store.clone(),
                "Sheet2".to_string(),
                SheetColumn::default_layout(),
                Duration::from_secs(5),
            )
            .unwrap())
        });
        let state = ApiState {
            store: store.clone(),
            reconciler,
            policy: Arc::new(SignalPolicy::FreeText),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(SyncLatency::new()),
        };
        (router(state), store)
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post(app: &Router, payload: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "text/plain; charset=utf-8")
            .body(Body::from(payload.to_string()))
            .unwrap();
        call(app, req).await
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        call(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn two_indicators_for_one_ticker_both_land() {
        let sheet = Arc::new(MemorySheet::default());
        let (app, store) = app_with(Some(Arc::clone(&sheet))).await;

        let (status, body) = post(&app, json!({"ticker": "AAPL", "indicator": "sma_strategy", "signal": "buy"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["applied"], json!(["sma_strategy"]));
        assert_eq!(body["sync"], "appended");

        let (status, body) = post(&app, json!({"ticker": "AAPL", "indicator": "occ", "signal": "sell"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sync"], "updated");

        let record = store.get("AAPL").await.unwrap().unwrap();
        assert_eq!(record.value(Indicator::SmaStrategy), "buy");
        assert_eq!(record.value(Indicator::Occ), "sell");
        assert_eq!(record.value(Indicator::Pmax), "");
        assert_eq!(sheet.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn repeated_primary_signal_transitions_once() {
        let (app, store) = app_with(None).await;

        let (_, first) = post(&app, json!({"ticker": "MSFT", "signal": "buy"})).await;
        let changed_at = store.get("MSFT").await.unwrap().unwrap().signal_changed_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (_, second) = post(&app, json!({"ticker": "MSFT", "signal": "buy"})).await;
        let record = store.get("MSFT").await.unwrap().unwrap();

        assert_eq!(first["signal_transition"], true);
        assert_eq!(second["signal_transition"], false);
        assert_eq!(second["sync"], "disabled");
        assert!(changed_at.is_some());
        assert_eq!(record.signal_changed_at, changed_at);
        assert!(record.date_updated > changed_at.unwrap());
    }

    #[tokio::test]
    async fn false_price_target_is_stored_as_null() {
        let (app, store) = app_with(None).await;
        let (status, _) = post(
            &app,
            json!({"ticker": "TSLA", "indicator": "pmax", "signal": "sell", "analystPriceTarget": "false"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.get("TSLA").await.unwrap().unwrap().analyst_price_target, None);
    }

    #[tokio::test]
    async fn unknown_indicator_is_rejected_without_mutation() {
        let sheet = Arc::new(MemorySheet::default());
        let (app, store) = app_with(Some(Arc::clone(&sheet))).await;

        let (status, body) = post(&app, json!({"ticker": "AAPL", "indicator": "macd", "signal": "buy"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["stored"], false);
        assert!(store.get("AAPL").await.unwrap().is_none());
        assert!(sheet.snapshot().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (app, _) = app_with(None).await;
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from("{ticker: AAPL"))
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn sync_failure_reports_bad_gateway_but_keeps_the_merge() {
        let sheet = Arc::new(MemorySheet::default());
        sheet.fail.store(true, Ordering::SeqCst);
        let (app, _) = app_with(Some(Arc::clone(&sheet))).await;

        let (status, body) = post(&app, json!({"ticker": "AMZN", "indicator": "occ", "signal": "buy"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "external_sync");
        assert_eq!(body["stored"], true);

        let (status, list) = get_json(&app, "/webhook").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["ticker"], "AMZN");
        assert_eq!(list[0]["occ"], "buy");

        let (_, health) = get_json(&app, "/health").await;
        assert_eq!(health["sync_failures"], 1);
        assert_eq!(health["last_sync_ok"], false);
        assert_eq!(health["merges_total"], 1);

        let (_, stats) = get_json(&app, "/stats/sync").await;
        assert_eq!(stats["samples"], 1);
    }

    #[tokio::test]
    async fn storage_failure_is_a_server_error_with_nothing_stored() {
        let pool = test_pool().await;
        let sheet = Arc::new(MemorySheet::default());
        let store = SecurityStore::new(pool.clone());
        let reconciler = Reconciler::new(
            sheet.clone(),
            store.clone(),
            "Sheet2".to_string(),
            SheetColumn::default_layout(),
            Duration::from_secs(5),
        )
        .unwrap();
        let app = router(ApiState {
            store,
            reconciler: Some(Arc::new(reconciler)),
            policy: Arc::new(SignalPolicy::FreeText),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(SyncLatency::new()),
        });
        sqlx::query("DROP TABLE securities").execute(&pool).await.unwrap();

        let (status, body) = post(&app, json!({"ticker": "AAPL", "signal": "buy"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "storage");
        assert_eq!(body["stored"], false);
        assert!(sheet.snapshot().is_empty());
    }

    #[tokio::test]
    async fn multi_signal_payload_reports_skipped_entries() {
        let (app, store) = app_with(None).await;
        let (status, body) = post(
            &app,
            json!({"ticker": "NVDA", "signals": [
                {"indicator": "occ", "signal": "buy"},
                {"indicator": "bogus", "signal": "sell"},
                {"indicator": "pmax", "signal": "hold"}
            ]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], json!(["occ", "pmax"]));
        assert_eq!(body["skipped"][0]["index"], 1);

        let record = store.get("NVDA").await.unwrap().unwrap();
        assert_eq!(record.value(Indicator::Occ), "buy");
        assert_eq!(record.value(Indicator::Pmax), "hold");
    }

    #[tokio::test]
    async fn delete_removes_or_reports_missing() {
        let (app, store) = app_with(None).await;
        post(&app, json!({"ticker": "META", "signal": "buy"})).await;

        let req = || {
            Request::builder()
                .method("DELETE")
                .uri("/webhook/META")
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = call(&app, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert!(store.get("META").await.unwrap().is_none());

        let (status, body) = call(&app, req()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }
}
