//! Configuration types for an ENEX → Notion migration.
//!
//! All migration behaviour is controlled through [`MigrationConfig`], built
//! via its [`MigrationConfigBuilder`]. Keeping every knob in one struct makes
//! it easy to share across tasks, log at start-up, and compare two runs.
//!
//! # Design choice: builder over constructor
//! Most callers set a token, a parent and maybe a checkpoint path; the
//! builder lets them rely on documented defaults for the rest and validates
//! the combination once in [`MigrationConfigBuilder::build`].

use crate::assemble::ParentKind;
use crate::block::{MAX_BLOCKS_PER_REQUEST, MAX_RICH_TEXT_LEN};
use crate::delivery::rate_limit::{DEFAULT_BURST, DEFAULT_RATE_PER_SEC};
use crate::delivery::RetryPolicy;
use crate::error::MigrateError;
use crate::progress::ProgressCallback;
use crate::upload::DEFAULT_UPLOAD_CONCURRENCY;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a migration run.
///
/// Built via [`MigrationConfig::builder()`].
///
/// # Example
/// ```rust
/// use edgequake_enex2notion::{MigrationConfig, ParentKind};
///
/// let config = MigrationConfig::builder()
///     .notion_token("secret_abc")
///     .parent_id("0123456789abcdef0123456789abcdef")
///     .parent_kind(ParentKind::Database)
///     .upload_concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    /// Notion integration token. Required unless `dry_run`.
    pub notion_token: Option<String>,

    /// Page or database under which notes are created. Required unless `dry_run`.
    pub parent_id: String,

    /// Whether `parent_id` is a page or a database. Default: page.
    pub parent_kind: ParentKind,

    /// Blob-host upload endpoint. Without it, attachments are left out of
    /// the pages with a warning.
    pub upload_url: Option<String>,

    /// Bearer token for the upload endpoint.
    pub upload_token: Option<String>,

    /// Checkpoint file. `None` keeps state in memory for this run only.
    pub checkpoint_path: Option<PathBuf>,

    /// Concurrent resource uploads. Default: 10.
    pub upload_concurrency: usize,

    /// Retries after the first attempt, for API calls and uploads. Default: 3.
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per retry. Default: 1000
    /// (1 s → 2 s → 4 s).
    pub retry_backoff_ms: u64,

    /// Sustained API rate, requests per second. Default: 3.0.
    pub rate_per_sec: f64,

    /// API burst capacity. Default: 10.
    pub burst: u32,

    /// Blocks per append call, 1–100. Default: 100.
    pub blocks_per_request: usize,

    /// Characters per rich-text object, 1–2000. Default: 2000.
    pub rich_text_limit: usize,

    /// Prepend the metadata callout to every page. Default: true.
    pub include_metadata: bool,

    /// Parse, index and convert without uploads or API calls. Default: false.
    pub dry_run: bool,

    /// Per-request timeout for the Notion API in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Per-request timeout for uploads in seconds. Default: 120.
    pub upload_timeout_secs: u64,

    /// Optional per-note / per-upload progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            notion_token: None,
            parent_id: String::new(),
            parent_kind: ParentKind::default(),
            upload_url: None,
            upload_token: None,
            checkpoint_path: None,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            max_retries: 3,
            retry_backoff_ms: 1000,
            rate_per_sec: DEFAULT_RATE_PER_SEC,
            burst: DEFAULT_BURST,
            blocks_per_request: MAX_BLOCKS_PER_REQUEST,
            rich_text_limit: MAX_RICH_TEXT_LEN,
            include_metadata: true,
            dry_run: false,
            api_timeout_secs: 60,
            upload_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("notion_token", &self.notion_token.as_ref().map(|_| "<redacted>"))
            .field("parent_id", &self.parent_id)
            .field("parent_kind", &self.parent_kind)
            .field("upload_url", &self.upload_url)
            .field("upload_token", &self.upload_token.as_ref().map(|_| "<redacted>"))
            .field("checkpoint_path", &self.checkpoint_path)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("rate_per_sec", &self.rate_per_sec)
            .field("burst", &self.burst)
            .field("blocks_per_request", &self.blocks_per_request)
            .field("rich_text_limit", &self.rich_text_limit)
            .field("include_metadata", &self.include_metadata)
            .field("dry_run", &self.dry_run)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl MigrationConfig {
    /// Create a new builder for `MigrationConfig`.
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Builder for [`MigrationConfig`].
#[derive(Debug)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn notion_token(mut self, token: impl Into<String>) -> Self {
        self.config.notion_token = Some(token.into());
        self
    }

    /// Accepts a bare id or a dashed UUID; dashes are removed.
    pub fn parent_id(mut self, id: impl Into<String>) -> Self {
        self.config.parent_id = id.into().trim().replace('-', "");
        self
    }

    pub fn parent_kind(mut self, kind: ParentKind) -> Self {
        self.config.parent_kind = kind;
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.upload_url = Some(url.into());
        self
    }

    pub fn upload_token(mut self, token: impl Into<String>) -> Self {
        self.config.upload_token = Some(token.into());
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn rate_per_sec(mut self, rate: f64) -> Self {
        self.config.rate_per_sec = rate;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.config.burst = burst;
        self
    }

    pub fn blocks_per_request(mut self, n: usize) -> Self {
        self.config.blocks_per_request = n.clamp(1, MAX_BLOCKS_PER_REQUEST);
        self
    }

    pub fn rich_text_limit(mut self, n: usize) -> Self {
        self.config.rich_text_limit = n.clamp(1, MAX_RICH_TEXT_LEN);
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MigrationConfig, MigrateError> {
        let c = &self.config;
        if !c.dry_run && c.parent_id.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "a parent page or database id is required".into(),
            ));
        }
        if !c.parent_id.is_empty()
            && (c.parent_id.len() != 32 || !c.parent_id.chars().all(|ch| ch.is_ascii_hexdigit()))
        {
            return Err(MigrateError::InvalidConfig(format!(
                "parent id must be 32 hex characters, got '{}'",
                c.parent_id
            )));
        }
        if !(c.rate_per_sec.is_finite() && c.rate_per_sec > 0.0) {
            return Err(MigrateError::InvalidConfig(format!(
                "rate must be > 0 requests/s, got {}",
                c.rate_per_sec
            )));
        }
        if c.burst == 0 {
            return Err(MigrateError::InvalidConfig("burst must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.upload_timeout_secs == 0 {
            return Err(MigrateError::InvalidConfig("timeouts must be ≥ 1 s".into()));
        }
        Ok(self.config)
    }
}
