//! Bounded-concurrency resource uploader with a persistent dedup cache.
//!
//! ```text
//! ResourceIndex::pending()
//!     │  (skip once cancelled)
//!     ├─ checkpoint hit ───────────────────────────▶ URL (no network)
//!     └─ in-flight map: hash → OnceCell
//!           ├─ first caller: retry(BlobHost::upload) → checkpoint.mark_uploaded
//!           └─ later callers: await the same cell, reuse its result
//! ```
//!
//! Up to `concurrency` uploads run at once (`buffer_unordered`). The
//! in-flight map spans the pipeline's lifetime, so two notes that reference
//! the same hash at the same moment trigger one remote upload between them.
//! Every successful URL is written to the checkpoint and then into the
//! caller's [`ResourceIndex`] before [`UploadPipeline::upload`] returns.

pub mod blob;

pub use blob::{BlobError, BlobHost, HttpBlobHost};

use crate::checkpoint::CheckpointStore;
use crate::delivery::retry::{retry, Attempt, RetryError, RetryPolicy};
use crate::error::{MigrateError, ResourceError};
use crate::model::{ContentHash, Resource};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::resources::ResourceIndex;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of concurrent uploads.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 10;

type UploadCell = Arc<OnceCell<Result<String, ResourceError>>>;

/// Tally for one [`UploadPipeline::upload`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Resources that needed a URL.
    pub total: usize,
    /// Remote uploads performed by this call.
    pub uploaded: usize,
    /// Resolved from the checkpoint or from another caller's upload.
    pub reused: usize,
    /// Not attempted because the run was cancelled.
    pub skipped: usize,
    pub failed: Vec<ResourceError>,
}

enum Outcome {
    Uploaded(String),
    Reused(String),
    Failed(ResourceError),
    Skipped,
}

pub struct UploadPipeline {
    host: Arc<dyn BlobHost>,
    checkpoint: Arc<CheckpointStore>,
    policy: RetryPolicy,
    concurrency: usize,
    progress: ProgressCallback,
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<ContentHash, UploadCell>>,
    /// First checkpoint write failure seen by a worker.
    checkpoint_error: Mutex<Option<MigrateError>>,
}

impl UploadPipeline {
    pub fn new(host: Arc<dyn BlobHost>, checkpoint: Arc<CheckpointStore>) -> Self {
        Self {
            host,
            checkpoint,
            policy: RetryPolicy::default(),
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            progress: Arc::new(NoopProgressCallback),
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
            checkpoint_error: Mutex::new(None),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a URL for every pending resource in `index`.
    ///
    /// Resource failures are reported, not returned as errors. The only
    /// error is a checkpoint that can no longer be written.
    pub async fn upload(&self, index: &mut ResourceIndex) -> Result<UploadReport, MigrateError> {
        let pending = index.pending();
        let total = pending.len();
        let mut report = UploadReport {
            total,
            ..UploadReport::default()
        };
        if total == 0 {
            return Ok(report);
        }

        let completed = AtomicUsize::new(0);
        let outcomes: Vec<(ContentHash, Outcome)> = stream::iter(pending.into_iter().map(|resource| {
            let completed = &completed;
            async move {
                let hash = resource.hash.clone();
                let outcome = self.upload_one(resource).await;
                if !matches!(outcome, Outcome::Skipped) {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.progress.on_upload_complete(done, total);
                }
                (hash, outcome)
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        if let Some(e) = self
            .checkpoint_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            return Err(e);
        }

        for (hash, outcome) in outcomes {
            match outcome {
                Outcome::Uploaded(url) => {
                    index.set_url(&hash, url);
                    report.uploaded += 1;
                }
                Outcome::Reused(url) => {
                    index.set_url(&hash, url);
                    report.reused += 1;
                }
                Outcome::Failed(e) => {
                    self.progress.on_upload_error(hash.as_str(), &e.to_string());
                    report.failed.push(e);
                }
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            "Resources: {} uploaded, {} reused, {} failed, {} skipped",
            report.uploaded,
            report.reused,
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    async fn upload_one(&self, resource: Resource) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Skipped;
        }
        if let Some(url) = self.checkpoint.is_resource_uploaded(&resource.hash) {
            debug!("Resource {} already uploaded", resource.hash.short());
            return Outcome::Reused(url);
        }

        let cell = {
            let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(map.entry(resource.hash.clone()).or_default())
        };

        let mut performed = false;
        let result = cell
            .get_or_init(|| {
                performed = true;
                self.perform(&resource)
            })
            .await
            .clone();

        match (result, performed) {
            (Ok(url), true) => Outcome::Uploaded(url),
            (Ok(url), false) => Outcome::Reused(url),
            (Err(e), _) => Outcome::Failed(e),
        }
    }

    async fn perform(&self, resource: &Resource) -> Result<String, ResourceError> {
        let label = format!("upload {}", resource.display_name());
        let host = &self.host;
        let result = retry(&self.policy, &label, |_| async move {
            match host.upload(resource).await {
                Ok(url) => Attempt::Done(url),
                Err(e) if e.retryable => Attempt::Retryable {
                    error: e,
                    retry_after: None,
                },
                Err(e) => Attempt::Fatal(e),
            }
        })
        .await;

        match result {
            Ok(url) => {
                debug!("Uploaded {} → {}", resource.hash.short(), url);
                if let Err(e) = self.checkpoint.mark_uploaded(&resource.hash, &url) {
                    self.record_checkpoint_error(e);
                }
                Ok(url)
            }
            Err(e) => {
                let (attempts, detail) = match e {
                    RetryError::Fatal { attempts, error } => (attempts, error.message),
                    RetryError::Exhausted { attempts, last } => (attempts, last.message),
                };
                warn!(
                    "Upload of {} ({}) failed after {} attempts: {}",
                    resource.hash,
                    resource.display_name(),
                    attempts,
                    detail
                );
                if let Err(e) = self.checkpoint.mark_resource_failed(&resource.hash, &detail) {
                    self.record_checkpoint_error(e);
                }
                Err(ResourceError::UploadFailed {
                    hash: resource.hash.clone(),
                    attempts,
                    detail,
                })
            }
        }
    }

    fn record_checkpoint_error(&self, e: MigrateError) {
        let mut slot = self
            .checkpoint_error
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}
