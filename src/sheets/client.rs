use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{AppError, Result, SyncError};
use crate::sheets::credentials::TokenSource;
use crate::sheets::{SheetsApi, ValueRows};

/// Google Sheets v4 `spreadsheets.values` client.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    api_url: Url,
    spreadsheet_id: String,
    tokens: TokenSource,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: ValueRows,
}

impl GoogleSheetsClient {
    pub fn new(api_url: &str, spreadsheet_id: &str, tokens: TokenSource) -> Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| AppError::Config(format!("SHEETS_API_URL {api_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(SyncError::from)?;
        Ok(Self {
            http,
            api_url,
            spreadsheet_id: spreadsheet_id.to_string(),
            tokens,
        })
    }

    /// `{api}/v4/spreadsheets/{id}/values/{range}{suffix}` with every segment escaped.
    fn values_url(&self, range: &str, suffix: &str) -> std::result::Result<Url, SyncError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Malformed(format!("unusable API base URL {}", self.api_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values"])
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }
}

/// 429 and 5xx are retryable upstream conditions; any other failure is a rejection.
async fn check(resp: Response) -> std::result::Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(if status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::RateLimited(body)
    } else if status.is_server_error() {
        SyncError::Unavailable { status: status.as_u16(), body }
    } else {
        SyncError::Rejected { status: status.as_u16(), body }
    })
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn get_range(&self, range: &str) -> std::result::Result<ValueRows, SyncError> {
        let url = self.values_url(range, "")?;
        let token = self.tokens.bearer().await?;
        let resp = check(self.http.get(url).bearer_auth(token).send().await?).await?;
        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| SyncError::Malformed(format!("values.get {range}: {e}")))?;
        debug!(range, rows = body.values.len(), "values.get");
        Ok(body.values)
    }

    async fn update_range(&self, range: &str, rows: ValueRows) -> std::result::Result<(), SyncError> {
        let url = self.values_url(range, "")?;
        let token = self.tokens.bearer().await?;
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        check(
            self.http
                .put(url)
                .query(&[("valueInputOption", "USER_ENTERED")])
                .bearer_auth(token)
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        debug!(range, "values.update");
        Ok(())
    }

    async fn append_rows(&self, range: &str, rows: ValueRows) -> std::result::Result<(), SyncError> {
        let url = self.values_url(range, ":append")?;
        let token = self.tokens.bearer().await?;
        let body = json!({ "majorDimension": "ROWS", "values": rows });
        check(
            self.http
                .post(url)
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .bearer_auth(token)
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        debug!(range, "values.append");
        Ok(())
    }
}
