//! [`DocumentApi`] over the Notion REST API.

use super::{ApiError, DocumentApi};
use crate::assemble::PageSpec;
use crate::block::Block;
use crate::error::{ApiErrorKind, MigrateError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

pub struct NotionHttpApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for NotionHttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionHttpApi")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Error body returned by the API: `{"object":"error","status":400,"code":"…","message":"…"}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl NotionHttpApi {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, MigrateError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MigrateError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: NOTION_API_BASE.to_string(),
            token: token.into(),
        })
    }

    /// Point at another server (proxy or test double).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(transport_error);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
        let (code, message) = match body {
            Some(b) => (b.code, b.message),
            None => (String::new(), text),
        };
        let kind = classify(status.as_u16(), &code);
        debug!("Notion API error {} ({}): {}", status, code, message);

        let mut error = ApiError::new(kind, format!("HTTP {status} {code}: {message}"));
        if let Some(delay) = retry_after {
            error = error.with_retry_after(delay);
        }
        Err(error)
    }
}

#[async_trait]
impl DocumentApi for NotionHttpApi {
    async fn create_page(&self, page: &PageSpec) -> Result<String, ApiError> {
        let url = format!("{}/pages", self.base_url);
        let body = self.send(self.http.post(url).json(&page.create_body())).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::new(ApiErrorKind::Other, "page-create response has no id"))
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/blocks/{}/children", self.base_url, page_id);
        let children: Vec<Value> = blocks.iter().map(Block::to_notion).collect();
        let body = self
            .send(self.http.patch(url).json(&json!({ "children": children })))
            .await?;
        Ok(appended_ids(&body))
    }
}

/// Ids of the blocks an append created, from its `results` list.
fn appended_ids(body: &Value) -> Vec<String> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Map an HTTP status and API error code to a retry class.
pub fn classify(status: u16, code: &str) -> ApiErrorKind {
    match code {
        "rate_limited" => ApiErrorKind::RateLimited,
        "validation_error" | "invalid_json" | "invalid_request" | "invalid_request_url" => {
            ApiErrorKind::Validation
        }
        "unauthorized" | "restricted_resource" => ApiErrorKind::Unauthorized,
        "object_not_found" => ApiErrorKind::NotFound,
        "service_unavailable"
        | "internal_server_error"
        | "conflict_error"
        | "gateway_timeout"
        | "database_connection_unavailable" => ApiErrorKind::Transient,
        _ => match status {
            429 => ApiErrorKind::RateLimited,
            400 => ApiErrorKind::Validation,
            401 | 403 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            409 | 500..=599 => ApiErrorKind::Transient,
            _ => ApiErrorKind::Other,
        },
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    let kind = if e.is_timeout() || e.is_connect() || e.is_request() {
        ApiErrorKind::Transient
    } else {
        ApiErrorKind::Other
    };
    ApiError::new(kind, e.to_string())
}
