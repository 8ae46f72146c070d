//! Run orchestration.
//!
//! ```text
//! for each note (sequential, document order):
//!   checkpoint hit? ───────────────────────────────▶ skip (no remote calls)
//!   ResourceIndex::build      verify hashes
//!   UploadPipeline::upload    hash → URL (concurrent, cached)
//!   parse_markup + convert    pure, URLs already resolved
//!   PageAssembler::assemble   metadata callout + icon + properties
//!   DeliveryClient            create page (or resume it), append chunks
//!   CheckpointStore           mark partial after each chunk, then processed
//! ```
//!
//! Uploads for a note finish before that note is converted, so every media
//! reference is either resolved or reported. Note- and resource-scoped
//! failures are recorded and the run continues; unauthorized and
//! target-not-found errors end it, returned as [`MigrateError::Halted`] with
//! the report so far.
//!
//! A page that was created but not filled is remembered in the checkpoint
//! with the number of top-level blocks it holds. The next attempt appends
//! the rest to that page instead of creating another.
//!
//! Export files are streamed note by note. A malformed record ends that file
//! (listed in `failed_files`, not marked processed) and the run moves on.
//!
//! Cancellation is cooperative: once the token fires no new note or upload
//! starts, work already in flight completes and is checkpointed, and the
//! report comes back with `cancelled = true`.

use crate::assemble::{PageAssembler, PageSpec};
use crate::checkpoint::{CheckpointStore, FailedNote};
use crate::config::MigrationConfig;
use crate::delivery::{DeliveryClient, DocumentApi, NotionHttpApi, RateLimiter};
use crate::enex::{count_notes, EnexReader};
use crate::error::{DeliveryError, MigrateError, NoteError};
use crate::markup::{convert_with_limit, parse_markup, ParseError};
use crate::model::Note;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::report::{
    DeliveredNote, FailedFileEntry, FailedNoteEntry, FailedResourceEntry, MigrationReport,
    WarningEntry,
};
use crate::resources::ResourceIndex;
use crate::upload::{BlobHost, HttpBlobHost, UploadPipeline};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns every component of a run; no ambient state.
pub struct Migrator {
    config: MigrationConfig,
    checkpoint: Arc<CheckpointStore>,
    delivery: Option<DeliveryClient>,
    uploader: Option<UploadPipeline>,
    assembler: PageAssembler,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

enum NoteOutcome {
    Delivered(String),
    Converted,
    Skipped,
    Failed(NoteError),
    /// Cancelled between upload and delivery; nothing was sent.
    Abandoned,
}

impl Migrator {
    /// Wire a migrator from explicit collaborators.
    ///
    /// `api` may be `None` only for dry runs. Without `host`, attachments are
    /// left out of the pages and reported.
    pub fn new(
        config: MigrationConfig,
        api: Option<Arc<dyn DocumentApi>>,
        host: Option<Arc<dyn BlobHost>>,
        checkpoint: Arc<CheckpointStore>,
    ) -> Result<Self, MigrateError> {
        if api.is_none() && !config.dry_run {
            return Err(MigrateError::InvalidConfig(
                "a document API is required unless running dry".into(),
            ));
        }
        let cancel = CancellationToken::new();
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let limiter = Arc::new(RateLimiter::new(config.rate_per_sec, config.burst));

        let delivery = api.filter(|_| !config.dry_run).map(|api| {
            DeliveryClient::new(api, limiter, config.retry_policy())
                .with_chunk_size(config.blocks_per_request)
        });
        let uploader = host.filter(|_| !config.dry_run).map(|host| {
            UploadPipeline::new(host, Arc::clone(&checkpoint))
                .with_concurrency(config.upload_concurrency)
                .with_retry_policy(config.retry_policy())
                .with_progress(Arc::clone(&progress))
                .with_cancellation(cancel.clone())
        });
        let assembler = PageAssembler::new(config.parent_id.clone(), config.parent_kind)
            .with_metadata(config.include_metadata);

        Ok(Self {
            config,
            checkpoint,
            delivery,
            uploader,
            assembler,
            progress,
            cancel,
        })
    }

    /// Build the HTTP clients and checkpoint named by `config`.
    pub fn from_config(config: MigrationConfig) -> Result<Self, MigrateError> {
        let checkpoint = Arc::new(match &config.checkpoint_path {
            Some(path) => CheckpointStore::open_file(path)?,
            None => CheckpointStore::in_memory(),
        });

        let api: Option<Arc<dyn DocumentApi>> = if config.dry_run {
            None
        } else {
            let token = config
                .notion_token
                .clone()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| MigrateError::InvalidConfig("a Notion token is required".into()))?;
            Some(Arc::new(NotionHttpApi::new(token, config.api_timeout())?))
        };

        let host: Option<Arc<dyn BlobHost>> = match (&config.upload_url, config.dry_run) {
            (Some(url), false) => Some(Arc::new(HttpBlobHost::new(
                url.clone(),
                config.upload_token.clone(),
                config.upload_timeout(),
            )?)),
            _ => None,
        };

        Self::new(config, api, host, checkpoint)
    }

    /// Token that stops the run after in-flight work completes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Migrate every file in order, skipping files the checkpoint marks done.
    ///
    /// A run-fatal error comes back as [`MigrateError::Halted`] carrying the
    /// report of every file handled before it.
    pub async fn migrate_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> Result<MigrationReport, MigrateError> {
        let mut report = MigrationReport::new(self.config.dry_run);
        for path in paths {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.migrate_file(path.as_ref()).await {
                Ok(file_report) => report.merge(file_report),
                Err(e) => return Err(e.halted(report)),
            }
        }
        Ok(report)
    }

    /// Migrate one `.enex` file, streaming its notes.
    ///
    /// The file is marked processed only when it was read to the end, every
    /// note in it was delivered (or already was) and the run was not
    /// cancelled.
    pub async fn migrate_file(&self, path: &Path) -> Result<MigrationReport, MigrateError> {
        let label = path.display().to_string();
        if !self.config.dry_run && self.checkpoint.is_file_processed(path) {
            info!("Skipping {} (already migrated)", label);
            let mut report = MigrationReport::new(self.config.dry_run);
            report.files_skipped.push(label);
            return Ok(report);
        }

        let total = count_notes(path)?;
        let reader = EnexReader::open(path)?;
        info!("Migrating {} notes from {}", total, label);
        self.progress.on_file_start(path, total);

        let mut report = self.run_notes(reader, total).await?;
        let complete = report.failed_files.is_empty();
        if complete {
            report.files_processed.push(label);
        }

        if !self.config.dry_run && complete && !report.cancelled && report.failed_notes.is_empty() {
            if let Err(e) = self.checkpoint.mark_file_processed(path) {
                return Err(e.halted(report));
            }
        }
        self.progress
            .on_file_complete(path, report.success_count(), report.failed_notes.len());
        Ok(report)
    }

    /// Migrate notes strictly in order.
    pub async fn migrate_notes(
        &self,
        notes: impl IntoIterator<Item = Note>,
    ) -> Result<MigrationReport, MigrateError> {
        let notes: Vec<Note> = notes.into_iter().collect();
        let total = notes.len();
        self.run_notes(notes.into_iter().map(Ok), total).await
    }

    /// The per-note loop behind both entry points. `total` only feeds
    /// progress and logs.
    async fn run_notes(
        &self,
        mut notes: impl Iterator<Item = Result<Note, MigrateError>>,
        total: usize,
    ) -> Result<MigrationReport, MigrateError> {
        let started = Instant::now();
        let mut report = MigrationReport::new(self.config.dry_run);
        let mut index = 0;

        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    "Cancelled: {} of {} notes not started",
                    total.saturating_sub(index),
                    total
                );
                report.cancelled = true;
                break;
            }
            let note = match notes.next() {
                None => break,
                Some(Ok(note)) => note,
                Some(Err(MigrateError::InvalidExport { path, detail })) => {
                    error!("{}: {}; later notes in it are not migrated", path.display(), detail);
                    report.failed_files.push(FailedFileEntry {
                        file: path.display().to_string(),
                        error: detail,
                    });
                    break;
                }
                Some(Err(e)) => {
                    report.duration_ms = started.elapsed().as_millis() as u64;
                    return Err(e.halted(report));
                }
            };
            report.notes_seen += 1;
            index += 1;

            let outcome = match self.migrate_note(&note, index, total, &mut report).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.duration_ms = started.elapsed().as_millis() as u64;
                    return Err(e.halted(report));
                }
            };
            match outcome {
                NoteOutcome::Delivered(page_id) => {
                    self.progress
                        .on_note_complete(index, total, &note.title, &page_id);
                    report.delivered.push(DeliveredNote {
                        note_id: note.id().to_string(),
                        title: note.title.clone(),
                        page_id,
                    });
                }
                NoteOutcome::Converted => {
                    self.progress.on_note_complete(index, total, &note.title, "");
                    report.converted += 1;
                }
                NoteOutcome::Skipped => {
                    self.progress.on_note_skipped(index, total, &note.title);
                    report.skipped += 1;
                }
                NoteOutcome::Failed(e) => {
                    self.progress
                        .on_note_error(index, total, &note.title, &e.to_string());
                    report.failed_notes.push(FailedNoteEntry {
                        note_id: note.id().to_string(),
                        title: note.title.clone(),
                        error: e,
                    });
                }
                NoteOutcome::Abandoned => {
                    report.notes_seen -= 1;
                    report.cancelled = true;
                    break;
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "{} notes: {} delivered, {} converted, {} skipped, {} failed",
            report.notes_seen,
            report.delivered.len(),
            report.converted,
            report.skipped,
            report.failed_notes.len()
        );
        Ok(report)
    }

    async fn migrate_note(
        &self,
        note: &Note,
        index: usize,
        total: usize,
        report: &mut MigrationReport,
    ) -> Result<NoteOutcome, MigrateError> {
        let id = note.id();
        if self.checkpoint.is_processed(&id) {
            debug!("Note {} '{}' already delivered", id, note.title);
            return Ok(NoteOutcome::Skipped);
        }
        self.progress.on_note_start(index, total, &note.title);
        debug!("Note {}/{} {} '{}'", index, total, id, note.title);

        // ── Resources ────────────────────────────────────────────────────
        let mut resources = ResourceIndex::build(note.resources.iter().cloned());
        for e in resources.integrity_errors() {
            report.failed_resources.push(FailedResourceEntry {
                note_title: note.title.clone(),
                error: e.clone(),
            });
        }
        if let Some(uploader) = &self.uploader {
            let uploads = uploader.upload(&mut resources).await?;
            report.resources_uploaded += uploads.uploaded;
            report.resources_reused += uploads.reused;
            report
                .failed_resources
                .extend(uploads.failed.into_iter().map(|error| FailedResourceEntry {
                    note_title: note.title.clone(),
                    error,
                }));
            if uploads.skipped > 0 {
                info!("Note '{}' left for the next run (cancelled during upload)", note.title);
                return Ok(NoteOutcome::Abandoned);
            }
        } else if !resources.is_empty() && !self.config.dry_run {
            warn!(
                "No upload endpoint configured; {} attachments of '{}' will be omitted",
                resources.len(),
                note.title
            );
        }

        // ── Conversion ───────────────────────────────────────────────────
        let root = match parse_markup(&note.content) {
            Ok(root) => Some(root),
            Err(ParseError::Empty) if note.content.trim().is_empty() => None,
            Err(e) => {
                warn!("Note {} '{}': {}", id, note.title, e);
                let error = NoteError::Markup {
                    detail: e.to_string(),
                };
                self.record_failure(note, &error, None)?;
                return Ok(NoteOutcome::Failed(error));
            }
        };
        let conversion = root
            .map(|root| convert_with_limit(&root, &resources, self.config.rich_text_limit))
            .unwrap_or_default();
        for warning in conversion.warnings {
            warn!("Note {} '{}': {}", id.as_str(), note.title, warning);
            report.warnings.push(WarningEntry {
                note_id: id.to_string(),
                title: note.title.clone(),
                warning,
            });
        }
        let page = self.assembler.assemble(note, conversion.blocks);

        // ── Delivery ─────────────────────────────────────────────────────
        let Some(delivery) = &self.delivery else {
            debug!("Dry run: '{}' → {} blocks", note.title, page.children.len());
            return Ok(NoteOutcome::Converted);
        };
        self.deliver(delivery, note, &page).await
    }

    /// Create the page (or pick up the one an earlier attempt created) and
    /// append the blocks it does not have yet, checkpointing after each chunk.
    async fn deliver(
        &self,
        delivery: &DeliveryClient,
        note: &Note,
        page: &PageSpec,
    ) -> Result<NoteOutcome, MigrateError> {
        let id = note.id();
        let (page_id, mut done) = match self.checkpoint.partial_page(&id) {
            Some(partial) => {
                info!(
                    "Resuming '{}' on page {} after {} blocks",
                    note.title, partial.page_id, partial.blocks_done
                );
                (partial.page_id, partial.blocks_done)
            }
            None => match delivery.create_page(page).await {
                Ok(page_id) => {
                    self.checkpoint.mark_partial(&id, &page_id, 0)?;
                    (page_id, 0)
                }
                Err(e) => return self.delivery_failed(note, e, None),
            },
        };

        let remaining = page.children.get(done..).unwrap_or_default();
        for chunk in delivery.plan(remaining) {
            if let Err(e) = delivery.append_chunk(&page_id, &chunk).await {
                return self.delivery_failed(note, e, Some(page_id));
            }
            done += chunk.len();
            self.checkpoint.mark_partial(&id, &page_id, done)?;
        }

        self.checkpoint.mark_processed(&id, &page_id)?;
        info!("Delivered '{}' ({} blocks)", note.title, page.children.len());
        Ok(NoteOutcome::Delivered(page_id))
    }

    fn delivery_failed(
        &self,
        note: &Note,
        e: DeliveryError,
        page_id: Option<String>,
    ) -> Result<NoteOutcome, MigrateError> {
        if e.is_run_fatal() {
            error!("Note {} '{}': {}", note.id(), note.title, e);
            return Err(e.into());
        }
        let detail = e.to_string();
        let error = match &page_id {
            Some(page_id) => NoteError::PartialDelivery {
                page_id: page_id.clone(),
                detail,
            },
            None => NoteError::Delivery { detail },
        };
        warn!("Note {} '{}': {}", note.id(), note.title, error);
        self.record_failure(note, &error, page_id)?;
        Ok(NoteOutcome::Failed(error))
    }

    fn record_failure(
        &self,
        note: &Note,
        error: &NoteError,
        page_id: Option<String>,
    ) -> Result<(), MigrateError> {
        if self.config.dry_run {
            return Ok(());
        }
        self.checkpoint.mark_failed(
            &note.id(),
            FailedNote {
                title: note.title.clone(),
                reason: error.to_string(),
                page_id,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::PageSpec;
    use crate::block::Block;
    use crate::delivery::ApiError;
    use crate::error::ApiErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const PARENT: &str = "0123456789abcdef0123456789abcdef";

    #[derive(Default)]
    struct RecordingApi {
        pages: Mutex<Vec<String>>,
        fail_titles: Vec<(&'static str, ApiErrorKind)>,
    }

    #[async_trait]
    impl DocumentApi for RecordingApi {
        async fn create_page(&self, page: &PageSpec) -> Result<String, ApiError> {
            if let Some((_, kind)) = self.fail_titles.iter().find(|(t, _)| *t == page.title) {
                return Err(ApiError::new(*kind, "scripted"));
            }
            let mut pages = self.pages.lock().unwrap();
            pages.push(page.title.clone());
            Ok(format!("page-{}", pages.len()))
        }

        async fn append_blocks(&self, _: &str, blocks: &[Block]) -> Result<Vec<String>, ApiError> {
            Ok(blocks.iter().map(|_| "blk".to_string()).collect())
        }
    }

    /// Fires the run's cancellation token from inside page creation.
    #[derive(Default)]
    struct CancelOnCreate {
        token: Mutex<Option<CancellationToken>>,
        pages: Mutex<Vec<String>>,
        appends: Mutex<usize>,
    }

    #[async_trait]
    impl DocumentApi for CancelOnCreate {
        async fn create_page(&self, page: &PageSpec) -> Result<String, ApiError> {
            if let Some(token) = self.token.lock().unwrap().as_ref() {
                token.cancel();
            }
            let mut pages = self.pages.lock().unwrap();
            pages.push(page.title.clone());
            Ok(format!("page-{}", pages.len()))
        }

        async fn append_blocks(&self, _: &str, blocks: &[Block]) -> Result<Vec<String>, ApiError> {
            *self.appends.lock().unwrap() += 1;
            Ok(blocks.iter().map(|_| "blk".to_string()).collect())
        }
    }

    fn config(dry_run: bool) -> MigrationConfig {
        MigrationConfig::builder()
            .parent_id(PARENT)
            .dry_run(dry_run)
            .build()
            .unwrap()
    }

    fn note(title: &str) -> Note {
        Note::new(title, format!("<en-note><div>{title}</div></en-note>"))
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_order_and_checkpoints() {
        let api = Arc::new(RecordingApi::default());
        let checkpoint = Arc::new(CheckpointStore::in_memory());
        let migrator =
            Migrator::new(config(false), Some(api.clone()), None, Arc::clone(&checkpoint)).unwrap();

        let report = migrator
            .migrate_notes(vec![note("a"), note("b"), note("c")])
            .await
            .unwrap();

        assert_eq!(*api.pages.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(report.delivered.len(), 3);
        assert!(checkpoint.is_processed(&note("b").id()));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_is_note_scoped() {
        let api = Arc::new(RecordingApi {
            fail_titles: vec![("bad", ApiErrorKind::Validation)],
            ..RecordingApi::default()
        });
        let checkpoint = Arc::new(CheckpointStore::in_memory());
        let migrator =
            Migrator::new(config(false), Some(api.clone()), None, Arc::clone(&checkpoint)).unwrap();

        let report = migrator
            .migrate_notes(vec![note("bad"), note("good")])
            .await
            .unwrap();

        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed_notes.len(), 1);
        assert!(matches!(report.failed_notes[0].error, NoteError::Delivery { .. }));
        assert!(checkpoint.snapshot().failed_notes.contains_key(note("bad").id().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_halts_the_run() {
        let api = Arc::new(RecordingApi {
            fail_titles: vec![("first", ApiErrorKind::Unauthorized)],
            ..RecordingApi::default()
        });
        let migrator = Migrator::new(
            config(false),
            Some(api.clone()),
            None,
            Arc::new(CheckpointStore::in_memory()),
        )
        .unwrap();

        let err = migrator
            .migrate_notes(vec![note("first"), note("second")])
            .await
            .unwrap_err();

        assert!(matches!(err.cause(), MigrateError::Unauthorized { .. }));
        assert!(api.pages.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn halted_run_keeps_the_report_so_far() {
        let api = Arc::new(RecordingApi {
            fail_titles: vec![("second", ApiErrorKind::Unauthorized)],
            ..RecordingApi::default()
        });
        let migrator = Migrator::new(
            config(false),
            Some(api.clone()),
            None,
            Arc::new(CheckpointStore::in_memory()),
        )
        .unwrap();

        let err = migrator
            .migrate_notes(vec![note("first"), note("second"), note("third")])
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Halted { .. }));
        assert!(matches!(err.cause(), MigrateError::Unauthorized { .. }));
        let report = err.report().unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.delivered[0].title, "first");
        assert_eq!(report.notes_seen, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_page_creation_finishes_that_note() {
        let api = Arc::new(CancelOnCreate::default());
        let checkpoint = Arc::new(CheckpointStore::in_memory());
        let migrator =
            Migrator::new(config(false), Some(api.clone()), None, Arc::clone(&checkpoint)).unwrap();
        *api.token.lock().unwrap() = Some(migrator.cancellation_token());

        let report = migrator
            .migrate_notes(vec![note("a"), note("b")])
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(*api.pages.lock().unwrap(), vec!["a"]);
        assert_eq!(*api.appends.lock().unwrap(), 1);
        assert_eq!(checkpoint.page_id(&note("a").id()).as_deref(), Some("page-1"));
        assert!(checkpoint.partial_page(&note("a").id()).is_none());
        assert!(!checkpoint.is_processed(&note("b").id()));
    }

    #[tokio::test]
    async fn dry_run_makes_no_calls() {
        let checkpoint = Arc::new(CheckpointStore::in_memory());
        let migrator = Migrator::new(config(true), None, None, Arc::clone(&checkpoint)).unwrap();
        let report = migrator.migrate_notes(vec![note("x")]).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.converted, 1);
        assert!(checkpoint.snapshot().notes.is_empty());
    }

    #[tokio::test]
    async fn unparseable_markup_fails_the_note() {
        let migrator = Migrator::new(
            config(false),
            Some(Arc::new(RecordingApi::default())),
            None,
            Arc::new(CheckpointStore::in_memory()),
        )
        .unwrap();
        let report = migrator
            .migrate_notes(vec![Note::new("text only", "just words, no markup")])
            .await
            .unwrap();
        assert!(matches!(report.failed_notes[0].error, NoteError::Markup { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let api = Arc::new(RecordingApi::default());
        let migrator = Migrator::new(
            config(false),
            Some(api.clone()),
            None,
            Arc::new(CheckpointStore::in_memory()),
        )
        .unwrap();
        migrator.cancellation_token().cancel();
        let report = migrator.migrate_notes(vec![note("a")]).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.notes_seen, 0);
        assert!(api.pages.lock().unwrap().is_empty());
    }

    #[test]
    fn api_required_outside_dry_run() {
        let result = Migrator::new(config(false), None, None, Arc::new(CheckpointStore::in_memory()));
        assert!(matches!(result, Err(MigrateError::InvalidConfig(_))));
    }
}
