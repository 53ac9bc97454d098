//! Bearer tokens for the Sheets API.
//!
//! Either a static token from the environment or a Google service account key
//! exchanged for short-lived access tokens through the OAuth 2.0 JWT bearer
//! flow. Minted tokens are cached until shortly before they expire.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{GOOGLE_TOKEN_URL, HTTP_TIMEOUT_SECS, SHEETS_SCOPE, TOKEN_REFRESH_MARGIN_SECS};
use crate::error::{Result, SyncError};

/// Lifetime requested for each minted token.
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// The fields we need from a `credentials.json` service account key.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

pub enum TokenSource {
    Static(String),
    ServiceAccount(ServiceAccountTokens),
}

impl TokenSource {
    pub fn service_account(key: ServiceAccountKey) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(SyncError::from)?;
        Ok(TokenSource::ServiceAccount(ServiceAccountTokens {
            key,
            http,
            cached: Mutex::new(None),
        }))
    }

    pub async fn bearer(&self) -> std::result::Result<String, SyncError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount(sa) => sa.bearer().await,
        }
    }
}

impl ServiceAccountTokens {
    async fn bearer(&self) -> std::result::Result<String, SyncError> {
        // Held across the exchange so concurrent requests mint one token, not N.
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(c) = cached.as_ref() {
            if c.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now {
                return Ok(c.token.clone());
            }
        }

        let fresh = self.mint(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn mint(&self, now: DateTime<Utc>) -> std::result::Result<CachedToken, SyncError> {
        let token_uri = self.key.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URL);
        let assertion = sign_assertion(&self.key, token_uri, now)?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let resp = self.http.post(token_uri).form(&params).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Credentials(format!(
                "token exchange failed ({status}): {body}"
            )));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Credentials(format!("unreadable token response: {e}")))?;
        let lifetime = parsed.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        info!(client = %self.key.client_email, lifetime_secs = lifetime, "minted sheets access token");

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        })
    }
}

fn sign_assertion(
    key: &ServiceAccountKey,
    audience: &str,
    now: DateTime<Utc>,
) -> std::result::Result<String, SyncError> {
    let claims = Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: audience,
        iat: now.timestamp(),
        exp: now.timestamp() + TOKEN_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| SyncError::Credentials(format!("invalid service account private key: {e}")))?;
    debug!(iss = %key.client_email, aud = audience, "signing token assertion");
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| SyncError::Credentials(format!("failed to sign assertion: {e}")))
}
