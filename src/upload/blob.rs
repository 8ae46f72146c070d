//! Blob hosting: bytes + MIME type in, public HTTPS URL out.

use crate::error::MigrateError;
use crate::model::Resource;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One failed upload attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BlobError {
    /// Whether another attempt may succeed.
    pub retryable: bool,
    pub message: String,
}

impl BlobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Anything that can host a resource under a public HTTPS URL.
#[async_trait]
pub trait BlobHost: Send + Sync {
    /// Upload once (no retries) and return the public URL.
    async fn upload(&self, resource: &Resource) -> Result<String, BlobError>;
}

/// Generic HTTP upload endpoint.
///
/// Sends the raw payload as the request body with its MIME type as
/// `Content-Type` and the file name as the `filename` query parameter. The
/// endpoint answers with JSON carrying `secure_url` or `url`.
pub struct HttpBlobHost {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpBlobHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBlobHost")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl HttpBlobHost {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, MigrateError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(MigrateError::InvalidConfig(format!(
                "upload endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MigrateError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl BlobHost for HttpBlobHost {
    async fn upload(&self, resource: &Resource) -> Result<String, BlobError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .query(&[("filename", resource.display_name())])
            .header(CONTENT_TYPE, resource.mime.as_str())
            .body(resource.data.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                BlobError::retryable(e.to_string())
            } else {
                BlobError::fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.trim());
            debug!("Upload of {} rejected: {}", resource.hash, message);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                BlobError::retryable(message)
            } else {
                BlobError::fatal(message)
            });
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| BlobError::retryable(format!("unreadable upload response: {e}")))?;
        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| BlobError::fatal("upload response has no url"))?;
        if !url.starts_with("https://") {
            return Err(BlobError::fatal(format!("upload URL is not https: {url}")));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoint() {
        let err = HttpBlobHost::new("ftp://files", None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let host = HttpBlobHost::new(
            "https://uploads.example.com/v1/blobs",
            Some("tok_secret".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!format!("{host:?}").contains("tok_secret"));
    }

    #[test]
    fn response_prefers_secure_url() {
        let r: UploadResponse =
            serde_json::from_str(r#"{"url":"http://a/x","secure_url":"https://a/x"}"#).unwrap();
        assert_eq!(r.secure_url.or(r.url).as_deref(), Some("https://a/x"));
    }
}
