//! Delivery to the remote document API.
//!
//! ```text
//! DeliveryClient ──acquire──▶ RateLimiter
//!       │
//!       └──retry(policy)──▶ dyn DocumentApi ──▶ NotionHttpApi (reqwest)
//!                                        └───▶ in-memory fakes (tests)
//! ```
//!
//! [`DocumentApi`] is the seam: it performs exactly one remote call per
//! method invocation and classifies failures into [`ApiErrorKind`]. Rate
//! limiting, retries, chunking, nesting limits and oversized child lists live in
//! [`client::DeliveryClient`] so every implementation gets them.

pub mod client;
pub mod notion;
pub mod rate_limit;
pub mod retry;

pub use client::DeliveryClient;
pub use notion::NotionHttpApi;
pub use rate_limit::RateLimiter;
pub use retry::{Attempt, RetryError, RetryPolicy};

use crate::assemble::PageSpec;
use crate::block::Block;
use crate::error::ApiErrorKind;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One failed remote call, classified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// Server-requested delay before the next attempt.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// The remote document API: page creation and block append.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Create an empty page from `page` (title, icon, properties) and return
    /// its identifier. `page.children` is not sent.
    async fn create_page(&self, page: &PageSpec) -> Result<String, ApiError>;

    /// Append `blocks` (at most one request's worth) under `parent_id`, a
    /// page or a block. Returns the ids of the created top-level blocks in
    /// order.
    async fn append_blocks(&self, parent_id: &str, blocks: &[Block]) -> Result<Vec<String>, ApiError>;
}
