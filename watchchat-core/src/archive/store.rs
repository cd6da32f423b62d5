//! Object-store access for the remote archive.
//!
//! [`ObjectStore`] is the narrow surface the archive client needs. The
//! production implementation talks to an S3-compatible bucket with temporary
//! credentials; [`super::memory::MemoryStore`] backs tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};

use super::credentials::{CredentialProvider, TemporaryCredentials};
use super::sigv4;

/// Minimal object-store operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in the bucket.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Object body, or `None` when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<String>>;

    async fn put_object(&self, key: &str, body: &str) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Establishes an [`ObjectStore`] connection, typically by fetching credentials.
#[async_trait]
pub trait ArchiveConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>>;
}

// ============================================
// Listing XML
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
    #[serde(default)]
    contents: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

/// One page of a bucket listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Marker for the next page, if the listing was truncated.
    pub next_marker: Option<String>,
}

/// Parse a `ListBucketResult` document.
pub fn parse_list_page(xml: &str) -> Result<ListPage> {
    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|e| Error::RemoteArchive(format!("malformed bucket listing: {}", e)))?;

    let keys: Vec<String> = result.contents.into_iter().map(|entry| entry.key).collect();
    let next_marker = if result.is_truncated {
        result
            .next_marker
            .filter(|marker| !marker.is_empty())
            .or_else(|| keys.last().cloned())
    } else {
        None
    };

    Ok(ListPage { keys, next_marker })
}

// ============================================
// S3-compatible store
// ============================================

/// Bucket access signed with temporary credentials, refreshed on expiry.
pub struct CosObjectStore {
    http_client: reqwest::Client,
    provider: Arc<dyn CredentialProvider>,
    config: ArchiveConfig,
    credentials: RwLock<TemporaryCredentials>,
}

impl CosObjectStore {
    pub fn new(
        http_client: reqwest::Client,
        provider: Arc<dyn CredentialProvider>,
        config: ArchiveConfig,
        credentials: TemporaryCredentials,
    ) -> Self {
        Self {
            http_client,
            provider,
            config,
            credentials: RwLock::new(credentials),
        }
    }

    async fn current_credentials(&self) -> Result<TemporaryCredentials> {
        {
            let creds = self.credentials.read().await;
            if !creds.is_expired(Utc::now()) {
                return Ok(creds.clone());
            }
        }

        let mut creds = self.credentials.write().await;
        // Another request may have refreshed while we waited for the lock.
        if creds.is_expired(Utc::now()) {
            tracing::debug!("Storage credentials expired, refreshing");
            *creds = self.provider.fetch().await?;
        }
        Ok(creds.clone())
    }

    fn object_url(&self, creds: &TemporaryCredentials, key: Option<&str>) -> Result<Url> {
        let base = self.config.endpoint_for(&creds.bucket, &creds.region);
        let raw = match key {
            Some(key) => format!("{}/{}", base, sigv4::encode_key(key)),
            None => format!("{}/", base),
        };
        Url::parse(&raw).map_err(|e| Error::RemoteArchive(format!("invalid object URL {}: {}", raw, e)))
    }

    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: Option<String>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let creds = self.current_credentials().await?;
        let mut url = self.object_url(&creds, key)?;
        url.set_query(query.as_deref());

        let signed = sigv4::sign(method.as_str(), &url, &body, &creds, Utc::now())?;

        let mut request = self
            .http_client
            .request(method.clone(), url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.payload_hash);
        if let Some(token) = signed.security_token {
            request = request.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            request = request
                .header("content-type", "application/json")
                .body(body);
        }

        request.send().await.map_err(|e| {
            Error::RemoteArchive(format!("{} {} failed: {}", method, key.unwrap_or("/"), e))
        })
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<ListPage> {
        let query = match marker {
            Some(marker) => format!("marker={}&prefix=", sigv4::uri_encode(marker)),
            None => "prefix=".to_string(),
        };
        let response = self.send(Method::GET, None, Some(query), Vec::new()).await?;
        let body = read_success_body(response, "list").await?;
        parse_list_page(&body)
    }
}

async fn read_success_body(response: reqwest::Response, action: &str) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::RemoteArchive(format!("failed to read {} response: {}", action, e)))?;
    if !status.is_success() {
        return Err(Error::RemoteArchive(format!(
            "{} failed ({}): {}",
            action,
            status,
            error_code(&body).unwrap_or(body.trim())
        )));
    }
    Ok(body)
}

/// `<Code>` of an S3 error document, if present.
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}

#[async_trait]
impl ObjectStore for CosObjectStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(marker.as_deref()).await?;
            keys.extend(page.keys);
            match page.next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => break,
            }
        }
        tracing::debug!(count = keys.len(), "Listed archive objects");
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let response = self.send(Method::GET, Some(key), None, Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_success_body(response, &format!("get {}", key))
            .await
            .map(Some)
    }

    async fn put_object(&self, key: &str, body: &str) -> Result<()> {
        let response = self
            .send(Method::PUT, Some(key), None, body.as_bytes().to_vec())
            .await?;
        read_success_body(response, &format!("put {}", key)).await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self.send(Method::DELETE, Some(key), None, Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        read_success_body(response, &format!("delete {}", key)).await?;
        Ok(())
    }
}

/// Connects by fetching temporary credentials from the credential service.
pub struct CosConnector {
    http_client: reqwest::Client,
    provider: Arc<dyn CredentialProvider>,
    config: ArchiveConfig,
}

impl CosConnector {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        config: ArchiveConfig,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            provider,
            config,
        })
    }
}

#[async_trait]
impl ArchiveConnector for CosConnector {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>> {
        let credentials = self.provider.fetch().await?;
        Ok(Arc::new(CosObjectStore::new(
            self.http_client.clone(),
            Arc::clone(&self.provider),
            self.config.clone(),
            credentials,
        )))
    }
}
