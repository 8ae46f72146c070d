//! End-of-run report: successes, skips and every failure with its reason.

use crate::error::{ConversionWarning, NoteError, ResourceError};
use serde::Serialize;
use std::fmt;

/// A note that now exists as a remote page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveredNote {
    pub note_id: String,
    pub title: String,
    pub page_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedNoteEntry {
    pub note_id: String,
    pub title: String,
    pub error: NoteError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedResourceEntry {
    /// Title of the note the resource belongs to.
    pub note_title: String,
    pub error: ResourceError,
}

/// An export that could not be read to the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFileEntry {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningEntry {
    pub note_id: String,
    pub title: String,
    pub warning: ConversionWarning,
}

/// Outcome of a migration run (one or more files).
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    /// The run stopped early on request.
    pub cancelled: bool,
    pub files_processed: Vec<String>,
    /// Files skipped because the checkpoint marks them done.
    pub files_skipped: Vec<String>,
    pub notes_seen: usize,
    pub delivered: Vec<DeliveredNote>,
    /// Notes converted without delivery (dry run).
    pub converted: usize,
    /// Notes already in the checkpoint.
    pub skipped: usize,
    pub failed_notes: Vec<FailedNoteEntry>,
    /// Files abandoned at a malformed record; notes before it still count.
    pub failed_files: Vec<FailedFileEntry>,
    pub failed_resources: Vec<FailedResourceEntry>,
    pub warnings: Vec<WarningEntry>,
    pub resources_uploaded: usize,
    pub resources_reused: usize,
    pub duration_ms: u64,
}

impl MigrationReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn success_count(&self) -> usize {
        if self.dry_run {
            self.converted
        } else {
            self.delivered.len()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_notes.is_empty()
            || !self.failed_resources.is_empty()
            || !self.failed_files.is_empty()
    }

    /// Fold another run's report into this one.
    pub fn merge(&mut self, other: MigrationReport) {
        self.dry_run |= other.dry_run;
        self.cancelled |= other.cancelled;
        self.files_processed.extend(other.files_processed);
        self.files_skipped.extend(other.files_skipped);
        self.notes_seen += other.notes_seen;
        self.delivered.extend(other.delivered);
        self.converted += other.converted;
        self.skipped += other.skipped;
        self.failed_notes.extend(other.failed_notes);
        self.failed_files.extend(other.failed_files);
        self.failed_resources.extend(other.failed_resources);
        self.warnings.extend(other.warnings);
        self.resources_uploaded += other.resources_uploaded;
        self.resources_reused += other.resources_reused;
        self.duration_ms += other.duration_ms;
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "converted" } else { "delivered" };
        writeln!(
            f,
            "{} of {} notes {} ({} already done, {} failed) in {:.1}s",
            self.success_count(),
            self.notes_seen,
            verb,
            self.skipped,
            self.failed_notes.len(),
            self.duration_ms as f64 / 1000.0
        )?;
        writeln!(
            f,
            "Resources: {} uploaded, {} reused, {} failed; {} conversion warnings",
            self.resources_uploaded,
            self.resources_reused,
            self.failed_resources.len(),
            self.warnings.len()
        )?;
        if self.cancelled {
            writeln!(f, "Run was cancelled; re-run to resume.")?;
        }
        if !self.failed_files.is_empty() {
            writeln!(f, "\nUnreadable files:")?;
            for file in &self.failed_files {
                writeln!(f, "  ✗ {}: {}", file.file, file.error)?;
            }
        }
        if !self.failed_notes.is_empty() {
            writeln!(f, "\nFailed notes:")?;
            for n in &self.failed_notes {
                writeln!(f, "  ✗ {} [{}]: {}", n.title, n.note_id, n.error)?;
            }
        }
        if !self.failed_resources.is_empty() {
            writeln!(f, "\nFailed resources:")?;
            for r in &self.failed_resources {
                writeln!(f, "  ✗ in '{}': {}", r.note_title, r.error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentHash;

    #[test]
    fn merge_adds_up() {
        let mut a = MigrationReport::new(false);
        a.notes_seen = 2;
        a.delivered.push(DeliveredNote {
            note_id: "n1".into(),
            title: "One".into(),
            page_id: "p1".into(),
        });
        let mut b = MigrationReport::new(false);
        b.notes_seen = 3;
        b.skipped = 1;
        b.failed_notes.push(FailedNoteEntry {
            note_id: "n3".into(),
            title: "Three".into(),
            error: NoteError::Delivery {
                detail: "validation error".into(),
            },
        });
        a.merge(b);
        assert_eq!(a.notes_seen, 5);
        assert_eq!(a.success_count(), 1);
        assert_eq!(a.skipped, 1);
        assert!(a.has_failures());
    }

    #[test]
    fn display_lists_failures() {
        let mut r = MigrationReport::new(false);
        r.notes_seen = 1;
        r.failed_resources.push(FailedResourceEntry {
            note_title: "Scans".into(),
            error: ResourceError::UploadFailed {
                hash: ContentHash::compute(b"scan"),
                attempts: 4,
                detail: "503".into(),
            },
        });
        let text = r.to_string();
        assert!(text.contains("Failed resources"), "{text}");
        assert!(text.contains("Scans"), "{text}");
    }

    #[test]
    fn unreadable_file_counts_as_failure() {
        let mut r = MigrationReport::new(false);
        r.failed_files.push(FailedFileEntry {
            file: "Travel.enex".into(),
            error: "at byte 912: mismatched end tag".into(),
        });
        assert!(r.has_failures());
        let mut total = MigrationReport::new(false);
        total.merge(r);
        assert_eq!(total.failed_files.len(), 1);
        assert!(total.to_string().contains("Travel.enex"));
    }

    #[test]
    fn serialises_to_json() {
        let mut r = MigrationReport::new(true);
        r.converted = 3;
        r.warnings.push(WarningEntry {
            note_id: "n".into(),
            title: "t".into(),
            warning: ConversionWarning::UnsupportedTag { tag: "blink".into() },
        });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["converted"], 3);
        assert_eq!(json["warnings"][0]["warning"]["kind"], "unsupported_tag");
    }
}
