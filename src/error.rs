//! Error types for the edgequake-enex2notion library.
//!
//! Failures are split by the scope they poison:
//!
//! * [`MigrateError`] is **run-fatal**: nothing further can succeed (bad
//!   credentials, missing parent page, unreadable checkpoint). Returned as
//!   `Err(MigrateError)` from the [`crate::migrate::Migrator`] entry points,
//!   wrapped in [`MigrateError::Halted`] together with the report of the work
//!   done before the stop.
//!
//! * [`NoteError`] is **note-fatal**: one note could not be delivered but the
//!   next one may well succeed. Recorded in the checkpoint and the final
//!   [`crate::report::MigrationReport`].
//!
//! * [`ResourceError`] is **resource-scoped**: one attachment is corrupt or
//!   could not be uploaded. The note is still delivered without it.
//!
//! [`DeliveryError`] is what the remote document API surfaces after the retry
//! policy has run; [`DeliveryError::is_run_fatal`] decides which of the two
//! outer scopes it escalates to.

use crate::model::ContentHash;
use crate::report::MigrationReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All run-fatal errors returned by the library.
#[derive(Debug, Error)]
pub enum MigrateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Export file was not found at the given path.
    #[error("ENEX file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The export could not be read as an ENEX document.
    #[error("Failed to read ENEX file '{path}': {detail}")]
    InvalidExport { path: PathBuf, detail: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Token rejected or lacking access to the target.
    #[error("Unauthorized: {detail}\nCheck NOTION_TOKEN and that the integration is shared with the parent page.")]
    Unauthorized { detail: String },

    /// The parent page / database does not exist (or is not shared).
    #[error("Target not found: {detail}\nCheck NOTION_PARENT_ID.")]
    TargetNotFound { detail: String },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Checkpoint could not be read or durably written.
    #[error("Checkpoint error at '{path}': {detail}")]
    Checkpoint { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled before all work was enqueued.
    #[error("Migration cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),

    /// A run-fatal error stopped the run part-way.
    #[error("{source}")]
    Halted {
        source: Box<MigrateError>,
        /// Notes delivered, skipped and failed before the stop.
        report: Box<MigrationReport>,
    },
}

impl MigrateError {
    /// Attach the report of the work done before this error.
    ///
    /// An already halted error keeps its cause, with `prior` folded in
    /// ahead of its report.
    pub fn halted(self, prior: MigrationReport) -> Self {
        match self {
            MigrateError::Halted { source, report } => {
                let mut merged = prior;
                merged.merge(*report);
                MigrateError::Halted {
                    source,
                    report: Box::new(merged),
                }
            }
            other => MigrateError::Halted {
                source: Box::new(other),
                report: Box::new(prior),
            },
        }
    }

    /// Partial report of a halted run.
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            MigrateError::Halted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The error that stopped the run, with any report wrapper removed.
    pub fn cause(&self) -> &MigrateError {
        match self {
            MigrateError::Halted { source, .. } => source.cause(),
            other => other,
        }
    }
}

impl From<DeliveryError> for MigrateError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Unauthorized { message } => MigrateError::Unauthorized { detail: message },
            DeliveryError::NotFound { message } => MigrateError::TargetNotFound { detail: message },
            other => MigrateError::Internal(other.to_string()),
        }
    }
}

/// Classification of a remote document API failure (drives the retry policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    RateLimited,
    Transient,
    Validation,
    Unauthorized,
    NotFound,
    Other,
}

impl ApiErrorKind {
    /// Whether the retry driver may try the call again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ApiErrorKind::RateLimited | ApiErrorKind::Transient | ApiErrorKind::Other
        )
    }
}

/// Terminal outcome of a remote document API call, after retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The payload was rejected. Not retried; fatal for this note only.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Credentials rejected. Fatal for the whole run.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Parent or page missing. Fatal for the whole run.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A retryable failure persisted through every attempt.
    #[error("{kind:?} after {attempts} attempts: {message}")]
    RetriesExhausted {
        kind: ApiErrorKind,
        attempts: u32,
        message: String,
    },
}

impl DeliveryError {
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            DeliveryError::Unauthorized { .. } | DeliveryError::NotFound { .. }
        )
    }
}

/// A non-fatal error for a single note.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoteError {
    /// The ENML could not be parsed into a tree.
    #[error("markup could not be parsed: {detail}")]
    Markup { detail: String },

    /// The remote API rejected or kept failing a call for this note.
    #[error("delivery failed: {detail}")]
    Delivery { detail: String },

    /// The page was created but appending its content failed part-way.
    #[error("page {page_id} created but content append failed: {detail}")]
    PartialDelivery { page_id: String, detail: String },
}

/// A non-fatal error for a single resource.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceError {
    /// Declared hash does not match the hash of the decoded payload.
    #[error("integrity error: declared hash {declared} but payload hashes to {computed}")]
    Integrity {
        declared: ContentHash,
        computed: ContentHash,
    },

    /// Upload failed after retries (or was rejected outright).
    #[error("upload of {hash} failed after {attempts} attempts: {detail}")]
    UploadFailed {
        hash: ContentHash,
        attempts: u32,
        detail: String,
    },
}

/// A diagnostic from the markup converter. Never aborts conversion.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionWarning {
    /// Tag outside the supported set; its children were kept.
    #[error("unsupported tag <{tag}> unwrapped")]
    UnsupportedTag { tag: String },

    /// `<en-media>` references a hash not present in the resource index.
    #[error("media {hash} not found in note resources; block omitted")]
    MissingMedia { hash: String },

    /// The resource exists but has no uploaded URL (failed or dry run).
    #[error("media {hash} has no uploaded URL; block omitted")]
    MediaNotUploaded { hash: String },

    /// `<img src>` that is not an https URL.
    #[error("image source '{src}' is not an https URL; block omitted")]
    UnsupportedImageSource { src: String },

    /// A table row had more cells than the first row.
    #[error("table row {row} has {cells} cells, truncated to {width}")]
    RowTruncated {
        row: usize,
        cells: usize,
        width: usize,
    },

    /// A colour value that could not be parsed; the span keeps the default colour.
    #[error("unrecognised colour '{value}'")]
    UnknownColor { value: String },
}
