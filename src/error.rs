use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

/// Rejections produced by the alert normalizer. Always caused by the caller.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("ticker must be a non-empty string")]
    MissingTicker,

    #[error("invalid indicator: {0}")]
    InvalidIndicator(String),

    #[error("missing signal for indicator {0}")]
    MissingSignal(String),

    #[error("signal {value:?} not accepted for indicator {indicator}")]
    InvalidSignal { indicator: String, value: String },

    #[error("`signals` must be an array of {{indicator, signal}} objects")]
    InvalidSignalList,

    #[error("payload carries both `signals` and `indicator`")]
    MixedPayloadShape,

    #[error("no valid signals in payload ({0} skipped)")]
    NoValidSignals(usize),
}

/// Failures talking to the external sheet. Local state is already committed
/// when one of these surfaces.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sheet request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sheet sync timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("sheet API rate limited: {0}")]
    RateLimited(String),

    #[error("sheet API unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("sheet API rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("sheet credentials error: {0}")]
    Credentials(String),

    #[error("unexpected sheet response: {0}")]
    Malformed(String),

    #[error("local read before sync failed: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("External sync error: {0}")]
    ExternalSync(#[from] SyncError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::Json(_) => "validation",
            AppError::Database(_) | AppError::Migration(_) => "storage",
            AppError::ExternalSync(_) => "external_sync",
            AppError::NotFound(_) => "not_found",
            _ => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Validation(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalSync(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // An external sync failure is only ever raised after the local merge committed.
        let stored = matches!(self, AppError::ExternalSync(_));
        let body = serde_json::json!({
            "status": "error",
            "kind": self.kind(),
            "stored": stored,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
