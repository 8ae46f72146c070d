//! Progress-callback trait for migration events.
//!
//! Inject an [`Arc<dyn MigrationProgressCallback>`] via
//! [`crate::config::MigrationConfigBuilder::progress_callback`] to receive
//! events as files, notes and resources are processed.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least invasive integration point: the CLI drives an
//! `indicatif` bar from it, a service could forward events to a channel, and
//! the library stays unaware of either. Upload events arrive from concurrent
//! workers, so the trait is `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_enex2notion::{MigrationConfig, MigrationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Delivered(AtomicUsize);
//!
//! impl MigrationProgressCallback for Delivered {
//!     fn on_note_complete(&self, _index: usize, _total: usize, _title: &str, _page_id: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = MigrationConfig::builder()
//!     .parent_id("0123456789abcdef0123456789abcdef")
//!     .progress_callback(Arc::new(Delivered(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the migrator as it works. All methods default to no-ops.
///
/// # Thread safety
///
/// `on_upload_complete` and `on_upload_error` are called from concurrent
/// upload workers. Note events are sequential.
pub trait MigrationProgressCallback: Send + Sync {
    /// A file's notes have been read and processing begins.
    fn on_file_start(&self, path: &Path, total_notes: usize) {
        let _ = (path, total_notes);
    }

    /// Before uploading and delivering note `index` (1-based).
    fn on_note_start(&self, index: usize, total: usize, title: &str) {
        let _ = (index, total, title);
    }

    /// The note is already in the checkpoint and was not sent again.
    fn on_note_skipped(&self, index: usize, total: usize, title: &str) {
        let _ = (index, total, title);
    }

    fn on_note_complete(&self, index: usize, total: usize, title: &str, page_id: &str) {
        let _ = (index, total, title, page_id);
    }

    fn on_note_error(&self, index: usize, total: usize, title: &str, error: &str) {
        let _ = (index, total, title, error);
    }

    /// An upload batch advanced: `completed` of `total` resources resolved.
    fn on_upload_complete(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// A resource failed after retries.
    fn on_upload_error(&self, hash: &str, error: &str) {
        let _ = (hash, error);
    }

    /// Once per file after every note was attempted.
    fn on_file_complete(&self, path: &Path, delivered: usize, failed: usize) {
        let _ = (path, delivered, failed);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl MigrationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::MigrationConfig`].
pub type ProgressCallback = Arc<dyn MigrationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        started: AtomicUsize,
        completed: AtomicUsize,
        skipped: AtomicUsize,
        errors: AtomicUsize,
        uploads: AtomicUsize,
    }

    impl MigrationProgressCallback for Tracking {
        fn on_note_start(&self, _: usize, _: usize, _: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_note_skipped(&self, _: usize, _: usize, _: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
        fn on_note_complete(&self, _: usize, _: usize, _: &str, _: &str) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_note_error(&self, _: usize, _: usize, _: &str, _: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_upload_complete(&self, completed: usize, _: usize) {
            self.uploads.store(completed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_file_start(Path::new("a.enex"), 3);
        cb.on_note_start(1, 3, "t");
        cb.on_note_skipped(2, 3, "t");
        cb.on_note_complete(1, 3, "t", "page");
        cb.on_note_error(3, 3, "t", "validation");
        cb.on_upload_complete(1, 1);
        cb.on_upload_error("abc", "503");
        cb.on_file_complete(Path::new("a.enex"), 1, 1);
    }

    #[test]
    fn tracking_callback_through_arc_dyn() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();
        cb.on_note_start(1, 2, "a");
        cb.on_note_complete(1, 2, "a", "p1");
        cb.on_note_start(2, 2, "b");
        cb.on_note_error(2, 2, "b", "boom");
        cb.on_note_skipped(1, 2, "a");
        cb.on_upload_complete(4, 4);

        assert_eq!(tracker.started.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.uploads.load(Ordering::SeqCst), 4);
    }
}
