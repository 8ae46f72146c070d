//! # edgequake-enex2notion
//!
//! Migrate Evernote exports (`.enex`) to Notion pages.
//!
//! ## Why this crate?
//!
//! An Evernote export is ENML (an XHTML dialect) with attachments embedded as
//! base64 and referenced from the markup by the MD5 of their payload. Notion
//! wants typed blocks with hard limits (2 000 characters per rich-text object,
//! 100 blocks per request, 3 requests per second) and hosts no arbitrary
//! files itself. This crate bridges the two: it converts the markup into
//! blocks preserving structure and inline formatting, uploads attachments to
//! a blob host, and delivers pages under the API's rate limit with a
//! checkpoint that makes every run resumable.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .enex
//!  │
//!  ├─ 1. Read      stream <note> records (quick-xml, base64, MD5)
//!  ├─ 2. Index     hash → resource, integrity-checked
//!  ├─ 3. Upload    concurrent, deduplicated, cached in the checkpoint
//!  ├─ 4. Convert   ENML tree → blocks (pure)
//!  ├─ 5. Assemble  metadata callout + icon + properties
//!  ├─ 6. Deliver   create page, append ≤100 blocks per call, rate-limited
//!  └─ 7. Record    checkpoint + final report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_enex2notion::{MigrationConfig, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::builder()
//!         .notion_token(std::env::var("NOTION_TOKEN")?)
//!         .parent_id("0123456789abcdef0123456789abcdef")
//!         .upload_url("https://uploads.example.com/v1/blobs")
//!         .checkpoint_path("migration.checkpoint.json")
//!         .build()?;
//!     let migrator = Migrator::from_config(config)?;
//!     let report = migrator.migrate_files(&["Notebook.enex"]).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `enex2notion` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-enex2notion = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod block;
pub mod checkpoint;
pub mod config;
pub mod delivery;
pub mod enex;
pub mod error;
pub mod markup;
pub mod migrate;
pub mod model;
pub mod progress;
pub mod report;
pub mod resources;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{PageAssembler, PageIcon, PageSpec, ParentKind};
pub use block::{Annotations, Block, Color, RichTextSpan};
pub use checkpoint::{
    CheckpointStorage, CheckpointStore, JsonFileStorage, MemoryStorage, PartialPage,
    PipelineCheckpoint,
};
pub use config::{MigrationConfig, MigrationConfigBuilder};
pub use delivery::{ApiError, DeliveryClient, DocumentApi, NotionHttpApi, RateLimiter, RetryPolicy};
pub use enex::{EnexReader, EnexSummary};
pub use error::{ApiErrorKind, ConversionWarning, DeliveryError, MigrateError, NoteError, ResourceError};
pub use markup::{convert, parse_markup, Conversion};
pub use migrate::Migrator;
pub use model::{ContentHash, Note, NoteId, Resource};
pub use progress::{MigrationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::MigrationReport;
pub use resources::ResourceIndex;
pub use upload::{BlobError, BlobHost, HttpBlobHost, UploadPipeline, UploadReport};
