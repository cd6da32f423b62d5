//! Temporary object-store credentials.
//!
//! The credential service hands out short-lived keys scoped to one bucket:
//!
//! ```json
//! {
//!   "Credentials": { "TmpSecretId": "...", "TmpSecretKey": "...", "Token": "..." },
//!   "ExpiredTime": 1718001800,
//!   "Bucket": "chats-1250000000",
//!   "Region": "ap-guangzhou"
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Credentials are treated as expired this long before the issuer's deadline.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Scoped, short-lived storage credentials.
#[derive(Clone)]
pub struct TemporaryCredentials {
    pub secret_id: String,
    pub secret_key: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub bucket: String,
    pub region: String,
}

impl TemporaryCredentials {
    /// Whether the credentials should be refreshed before the next request.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }
}

impl std::fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("secret_id", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

/// Source of temporary credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<TemporaryCredentials>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    credentials: RawCredentials,
    expired_time: i64,
    bucket: String,
    region: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCredentials {
    tmp_secret_id: String,
    tmp_secret_key: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CredentialErrorBody {
    error: String,
}

/// Decode a successful credential service body.
pub fn parse_credentials(body: &str) -> Result<TemporaryCredentials> {
    let response: CredentialResponse = serde_json::from_str(body)
        .map_err(|e| Error::Credential(format!("malformed credential response: {}", e)))?;

    let expires_at = Utc
        .timestamp_opt(response.expired_time, 0)
        .single()
        .ok_or_else(|| {
            Error::Credential(format!("invalid ExpiredTime: {}", response.expired_time))
        })?;

    Ok(TemporaryCredentials {
        secret_id: response.credentials.tmp_secret_id,
        secret_key: response.credentials.tmp_secret_key,
        token: response.credentials.token,
        expires_at,
        bucket: response.bucket,
        region: response.region,
    })
}

/// Fetches credentials from the credential service over HTTP.
pub struct HttpCredentialProvider {
    http_client: reqwest::Client,
    url: String,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> Result<TemporaryCredentials> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Credential(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Credential(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<CredentialErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(Error::Credential(format!(
                "credential service error ({}): {}",
                status, message
            )));
        }

        let credentials = parse_credentials(&body)?;
        tracing::info!(
            bucket = %credentials.bucket,
            region = %credentials.region,
            expires_at = %credentials.expires_at,
            "Fetched temporary storage credentials"
        );
        Ok(credentials)
    }
}
