//! Resumable run state.
//!
//! [`CheckpointStore`] records, per run:
//!
//! * processed `.enex` files,
//! * delivered notes (note id → page id),
//! * notes whose page exists but whose content is only partly appended,
//! * uploaded resources (content hash → URL),
//! * failed notes and failed resources with a reason.
//!
//! Every mutation rewrites the whole record through the injected
//! [`CheckpointStorage`] before returning, so an abrupt stop loses at most the
//! item that was in flight. A mutation is applied to a copy and only becomes
//! visible once the write succeeds. Replaying a recorded note or resource is a no-op:
//! callers consult [`CheckpointStore::is_processed`] and
//! [`CheckpointStore::is_resource_uploaded`] before any remote call.
//!
//! The store is shared by concurrent upload workers. A single mutex covers
//! both the in-memory record and the write, so writes are serialised and
//! land in mutation order.

pub mod storage;

pub use storage::{CheckpointStorage, JsonFileStorage, MemoryStorage};

use crate::error::MigrateError;
use crate::model::{ContentHash, NoteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A note that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedNote {
    pub title: String,
    pub reason: String,
    /// Set when the page was created but its content was not fully appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// A page that was created but has not received all of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPage {
    pub page_id: String,
    /// Top-level blocks already appended, in delivery order.
    pub blocks_done: usize,
}

/// The persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    pub version: u32,
    #[serde(default)]
    pub processed_files: BTreeSet<String>,
    /// Note id → remote page id.
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
    /// Note id → page created but not finished.
    #[serde(default)]
    pub partial: BTreeMap<String, PartialPage>,
    /// Content hash → uploaded URL.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub failed_notes: BTreeMap<String, FailedNote>,
    /// Content hash → reason.
    #[serde(default)]
    pub failed_resources: BTreeMap<String, String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PipelineCheckpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            processed_files: BTreeSet::new(),
            notes: BTreeMap::new(),
            partial: BTreeMap::new(),
            resources: BTreeMap::new(),
            failed_notes: BTreeMap::new(),
            failed_resources: BTreeMap::new(),
            updated_at: None,
        }
    }
}

#[derive(Debug)]
pub struct CheckpointStore {
    storage: Box<dyn CheckpointStorage>,
    state: Mutex<PipelineCheckpoint>,
}

impl CheckpointStore {
    /// Load existing state from `storage`, or start empty.
    pub fn open(storage: impl CheckpointStorage + 'static) -> Result<Self, MigrateError> {
        let location = storage.location();
        let bytes = storage.read().map_err(|e| MigrateError::Checkpoint {
            path: location.clone(),
            detail: format!("read failed: {e}"),
        })?;

        let state = match bytes {
            Some(bytes) => {
                let state: PipelineCheckpoint =
                    serde_json::from_slice(&bytes).map_err(|e| MigrateError::Checkpoint {
                        path: location.clone(),
                        detail: format!("not a valid checkpoint: {e}"),
                    })?;
                if state.version > CHECKPOINT_VERSION {
                    return Err(MigrateError::Checkpoint {
                        path: location,
                        detail: format!(
                            "checkpoint version {} is newer than supported version {}",
                            state.version, CHECKPOINT_VERSION
                        ),
                    });
                }
                debug!(
                    "Resuming from checkpoint {}: {} notes, {} resources",
                    location.display(),
                    state.notes.len(),
                    state.resources.len()
                );
                state
            }
            None => PipelineCheckpoint::default(),
        };

        Ok(Self {
            storage: Box::new(storage),
            state: Mutex::new(state),
        })
    }

    /// Checkpoint file at `path`.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, MigrateError> {
        Self::open(JsonFileStorage::new(path.as_ref()))
    }

    /// Non-durable store.
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryStorage::new()),
            state: Mutex::new(PipelineCheckpoint::default()),
        }
    }

    // ── Notes ────────────────────────────────────────────────────────────

    pub fn is_processed(&self, id: &NoteId) -> bool {
        self.lock().notes.contains_key(id.as_str())
    }

    /// Page id recorded for a delivered note.
    pub fn page_id(&self, id: &NoteId) -> Option<String> {
        self.lock().notes.get(id.as_str()).cloned()
    }

    /// Page created for `id` by an earlier, unfinished delivery.
    pub fn partial_page(&self, id: &NoteId) -> Option<PartialPage> {
        self.lock().partial.get(id.as_str()).cloned()
    }

    /// Record that `page_id` exists for `id` and holds its first
    /// `blocks_done` top-level blocks.
    pub fn mark_partial(
        &self,
        id: &NoteId,
        page_id: &str,
        blocks_done: usize,
    ) -> Result<(), MigrateError> {
        self.mutate(|s| {
            s.partial.insert(
                id.as_str().to_string(),
                PartialPage {
                    page_id: page_id.to_string(),
                    blocks_done,
                },
            );
        })
    }

    /// Record a delivered note. Clears any earlier failure or partial state.
    pub fn mark_processed(&self, id: &NoteId, page_id: &str) -> Result<(), MigrateError> {
        self.mutate(|s| {
            s.failed_notes.remove(id.as_str());
            s.partial.remove(id.as_str());
            s.notes.insert(id.as_str().to_string(), page_id.to_string());
        })
    }

    /// Record a note failure. A failed note is attempted again on the next run.
    pub fn mark_failed(&self, id: &NoteId, failure: FailedNote) -> Result<(), MigrateError> {
        self.mutate(|s| {
            s.failed_notes.insert(id.as_str().to_string(), failure);
        })
    }

    // ── Resources ────────────────────────────────────────────────────────

    /// Uploaded URL for `hash`, if any earlier upload succeeded.
    pub fn is_resource_uploaded(&self, hash: &ContentHash) -> Option<String> {
        self.lock().resources.get(hash.as_str()).cloned()
    }

    pub fn mark_uploaded(&self, hash: &ContentHash, url: &str) -> Result<(), MigrateError> {
        self.mutate(|s| {
            s.failed_resources.remove(hash.as_str());
            s.resources.insert(hash.as_str().to_string(), url.to_string());
        })
    }

    pub fn mark_resource_failed(&self, hash: &ContentHash, reason: &str) -> Result<(), MigrateError> {
        self.mutate(|s| {
            s.failed_resources
                .insert(hash.as_str().to_string(), reason.to_string());
        })
    }

    // ── Files ────────────────────────────────────────────────────────────

    pub fn is_file_processed(&self, file: &Path) -> bool {
        self.lock().processed_files.contains(&file_key(file))
    }

    pub fn mark_file_processed(&self, file: &Path) -> Result<(), MigrateError> {
        let key = file_key(file);
        self.mutate(|s| {
            s.processed_files.insert(key);
        })
    }

    // ── Inspection ───────────────────────────────────────────────────────

    /// A copy of the current record.
    pub fn snapshot(&self) -> PipelineCheckpoint {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineCheckpoint> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mutate(&self, f: impl FnOnce(&mut PipelineCheckpoint)) -> Result<(), MigrateError> {
        let mut state = self.lock();
        let mut next = state.clone();
        f(&mut next);
        next.updated_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| MigrateError::Internal(format!("checkpoint serialisation: {e}")))?;
        self.storage.write(&bytes).map_err(|e| MigrateError::Checkpoint {
            path: self.storage.location(),
            detail: format!("write failed: {e}"),
        })?;
        *state = next;
        Ok(())
    }
}

/// Files are keyed by their canonical path when it resolves, else as given.
fn file_key(file: &Path) -> String {
    std::fs::canonicalize(file)
        .unwrap_or_else(|_| file.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Storage whose writes always fail.
    #[derive(Debug)]
    struct ReadOnlyDisk;

    impl CheckpointStorage for ReadOnlyDisk {
        fn read(&self) -> io::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn write(&self, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        fn location(&self) -> PathBuf {
            PathBuf::from("/ro/checkpoint.json")
        }
    }

    fn note_id(s: &str) -> NoteId {
        NoteId::new(s)
    }

    #[test]
    fn every_mutation_is_written() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CheckpointStore::open(Arc::clone(&storage)).unwrap();
        let hash = ContentHash::compute(b"img");

        store.mark_uploaded(&hash, "https://cdn/x.png").unwrap();
        store.mark_processed(&note_id("n1"), "page-1").unwrap();
        assert_eq!(storage.writes(), 2);

        let written: PipelineCheckpoint =
            serde_json::from_slice(&storage.contents().unwrap()).unwrap();
        assert_eq!(written.notes["n1"], "page-1");
        assert_eq!(written.resources[hash.as_str()], "https://cdn/x.png");
    }

    #[test]
    fn reopen_resumes_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let hash = ContentHash::compute(b"pdf");
        {
            let store = CheckpointStore::open_file(&path).unwrap();
            store.mark_processed(&note_id("n1"), "page-1").unwrap();
            store.mark_uploaded(&hash, "https://cdn/a.pdf").unwrap();
            store
                .mark_failed(
                    &note_id("n2"),
                    FailedNote {
                        title: "Broken".into(),
                        reason: "validation error".into(),
                        page_id: None,
                    },
                )
                .unwrap();
        }
        let store = CheckpointStore::open_file(&path).unwrap();
        assert!(store.is_processed(&note_id("n1")));
        assert!(!store.is_processed(&note_id("n2")));
        assert_eq!(store.page_id(&note_id("n1")).as_deref(), Some("page-1"));
        assert_eq!(
            store.is_resource_uploaded(&hash).as_deref(),
            Some("https://cdn/a.pdf")
        );
        assert_eq!(store.snapshot().failed_notes["n2"].title, "Broken");
    }

    #[test]
    fn success_clears_earlier_failure() {
        let store = CheckpointStore::in_memory();
        let id = note_id("n1");
        store
            .mark_failed(
                &id,
                FailedNote {
                    title: "t".into(),
                    reason: "timeout".into(),
                    page_id: None,
                },
            )
            .unwrap();
        store.mark_processed(&id, "page-9").unwrap();
        let snap = store.snapshot();
        assert!(snap.failed_notes.is_empty());
        assert_eq!(snap.notes.len(), 1);

        let hash = ContentHash::compute(b"r");
        store.mark_resource_failed(&hash, "503").unwrap();
        store.mark_uploaded(&hash, "https://cdn/r").unwrap();
        assert!(store.snapshot().failed_resources.is_empty());
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let store = CheckpointStore::open(ReadOnlyDisk).unwrap();
        let hash = ContentHash::compute(b"img");

        let err = store.mark_uploaded(&hash, "https://cdn/x.png").unwrap_err();
        assert!(matches!(err, MigrateError::Checkpoint { .. }), "{err}");
        assert!(store.is_resource_uploaded(&hash).is_none());

        assert!(store.mark_processed(&note_id("n1"), "page-1").is_err());
        assert!(!store.is_processed(&note_id("n1")));
        assert_eq!(store.snapshot(), PipelineCheckpoint::default());
    }

    #[test]
    fn partial_page_is_tracked_until_processed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let id = note_id("n1");
        {
            let store = CheckpointStore::open_file(&path).unwrap();
            store.mark_partial(&id, "page-7", 0).unwrap();
            store.mark_partial(&id, "page-7", 100).unwrap();
        }
        let store = CheckpointStore::open_file(&path).unwrap();
        assert!(!store.is_processed(&id));
        assert_eq!(
            store.partial_page(&id),
            Some(PartialPage {
                page_id: "page-7".into(),
                blocks_done: 100,
            })
        );

        store.mark_processed(&id, "page-7").unwrap();
        assert!(store.partial_page(&id).is_none());
        assert!(store.snapshot().partial.is_empty());
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = CheckpointStore::open_file(&path).unwrap_err();
        assert!(matches!(err, MigrateError::Checkpoint { .. }));
    }

    #[test]
    fn newer_version_is_rejected() {
        let storage = MemoryStorage::new();
        storage
            .write(br#"{"version": 99, "notes": {}}"#)
            .unwrap();
        let err = CheckpointStore::open(storage).unwrap_err();
        assert!(err.to_string().contains("newer"), "{err}");
    }

    #[test]
    fn files_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let enex = dir.path().join("export.enex");
        std::fs::write(&enex, b"<en-export/>").unwrap();
        let store = CheckpointStore::in_memory();
        assert!(!store.is_file_processed(&enex));
        store.mark_file_processed(&enex).unwrap();
        assert!(store.is_file_processed(&enex));
    }
}
