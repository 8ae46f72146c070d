//! Rate-limited, retrying page delivery.
//!
//! Every remote call passes through [`RateLimiter::acquire`] and the
//! [`retry`] driver. Block content is appended in chunks of at most
//! [`MAX_BLOCKS_PER_REQUEST`] top-level blocks, strictly sequentially and in
//! document order; children nested deeper than the API accepts per request
//! are hoisted first. A child list longer than one request may carry (a long
//! table, a list item with many sub-items) is sent in part with its parent,
//! and the rest is appended under the parent's returned block id.

use super::rate_limit::RateLimiter;
use super::retry::{retry, Attempt, RetryError, RetryPolicy};
use super::{ApiError, DocumentApi};
use crate::assemble::PageSpec;
use crate::block::{flatten_nesting, Block, MAX_BLOCKS_PER_REQUEST, MAX_NESTING_PER_REQUEST};
use crate::error::{ApiErrorKind, DeliveryError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub struct DeliveryClient {
    api: Arc<dyn DocumentApi>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl DeliveryClient {
    pub fn new(api: Arc<dyn DocumentApi>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            api,
            limiter,
            policy,
            chunk_size: MAX_BLOCKS_PER_REQUEST,
        }
    }

    /// Blocks per append call, clamped to `1..=100`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_BLOCKS_PER_REQUEST);
        self
    }

    /// Create the page (without content) and return its identifier.
    pub async fn create_page(&self, spec: &PageSpec) -> Result<String, DeliveryError> {
        let label = format!("create page '{}'", spec.title);
        let page_id = self.call(&label, || self.api.create_page(spec)).await?;
        debug!("Created page {} for '{}'", page_id, spec.title);
        Ok(page_id)
    }

    /// Top-level chunks `blocks` are appended in, nesting already flattened.
    ///
    /// Flattening leaves the top level untouched, so chunk `i` starts at
    /// block `i * chunk_size` of the input.
    pub fn plan(&self, blocks: &[Block]) -> Vec<Vec<Block>> {
        flatten_nesting(blocks.to_vec(), MAX_NESTING_PER_REQUEST)
            .chunks(self.chunk_size)
            .map(<[Block]>::to_vec)
            .collect()
    }

    /// Append `blocks` to `page_id`. Returns the number of append calls made.
    pub async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<usize, DeliveryError> {
        let mut calls = 0;
        for chunk in self.plan(blocks) {
            calls += self.append_chunk(page_id, &chunk).await?;
        }
        Ok(calls)
    }

    /// Append one planned chunk under `parent_id`.
    ///
    /// Children that do not fit in the request are appended afterwards under
    /// the id the API returned for their parent, recursively. Returns the
    /// number of append calls made.
    pub fn append_chunk<'a>(
        &'a self,
        parent_id: &'a str,
        chunk: &'a [Block],
    ) -> BoxFuture<'a, Result<usize, DeliveryError>> {
        Box::pin(async move {
            let (heads, tails): (Vec<Block>, Vec<Vec<Block>>) = chunk
                .iter()
                .cloned()
                .map(|b| b.split_for_request(MAX_BLOCKS_PER_REQUEST))
                .unzip();
            let label = format!("append {} blocks to {}", heads.len(), parent_id);
            let ids = self
                .call(&label, || self.api.append_blocks(parent_id, &heads))
                .await?;

            let mut calls = 1;
            for (i, tail) in tails.iter().enumerate() {
                if tail.is_empty() {
                    continue;
                }
                let Some(block_id) = ids.get(i) else {
                    return Err(DeliveryError::Validation {
                        message: format!(
                            "append to {} returned {} ids for {} blocks",
                            parent_id,
                            ids.len(),
                            heads.len()
                        ),
                    });
                };
                debug!("Appending {} overflow children under {}", tail.len(), block_id);
                for piece in tail.chunks(self.chunk_size) {
                    calls += self.append_chunk(block_id, piece).await?;
                }
            }
            Ok(calls)
        })
    }

    async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let limiter = &self.limiter;
        let result = retry(&self.policy, label, |_| {
            let request = op();
            async move {
                limiter.acquire().await;
                match request.await {
                    Ok(value) => Attempt::Done(value),
                    Err(e) if e.kind.is_retryable() => Attempt::Retryable {
                        retry_after: e.retry_after,
                        error: e,
                    },
                    Err(e) => Attempt::Fatal(e),
                }
            }
        })
        .await;
        result.map_err(into_delivery_error)
    }
}

fn into_delivery_error(e: RetryError<ApiError>) -> DeliveryError {
    match e {
        RetryError::Fatal { attempts, error } => match error.kind {
            ApiErrorKind::Validation => DeliveryError::Validation {
                message: error.message,
            },
            ApiErrorKind::Unauthorized => DeliveryError::Unauthorized {
                message: error.message,
            },
            ApiErrorKind::NotFound => DeliveryError::NotFound {
                message: error.message,
            },
            kind => DeliveryError::RetriesExhausted {
                kind,
                attempts,
                message: error.message,
            },
        },
        RetryError::Exhausted { attempts, last } => DeliveryError::RetriesExhausted {
            kind: last.kind,
            attempts,
            message: last.message,
        },
    }
}
