//! Domain records produced by the container reader and consumed by the pipeline.
//!
//! A [`Note`] is produced once, never mutated, and consumed exactly once by
//! [`crate::migrate::Migrator`]. A [`Resource`] is immutable except for the
//! uploaded URL, which lives in [`crate::resources::ResourceIndex`] rather
//! than on the record itself so the note can stay shared and read-only.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// MD5 digest of a resource's decoded payload, as 32 lowercase hex characters.
///
/// This is the key ENML uses in `<en-media hash="…">` to reference an
/// attachment, and the key of the upload dedup cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash {
    hex: String,
}

/// Errors when parsing a content hash from a hex string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentHashError {
    #[error("invalid hash: expected 32 hex characters, got {0} characters")]
    InvalidLength(usize),

    #[error("invalid hex character at position {position}: '{character}'")]
    InvalidCharacter { position: usize, character: char },
}

impl ContentHash {
    /// Hash the given (already decoded) bytes.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        Self {
            hex: format!("{:x}", hasher.finalize()),
        }
    }

    /// Parse a hash from its hex form, normalising to lowercase.
    pub fn from_hex(hex: &str) -> Result<Self, ContentHashError> {
        let hex = hex.trim();
        if hex.len() != 32 {
            return Err(ContentHashError::InvalidLength(hex.len()));
        }
        if let Some((position, character)) =
            hex.chars().enumerate().find(|(_, c)| !c.is_ascii_hexdigit())
        {
            return Err(ContentHashError::InvalidCharacter {
                position,
                character,
            });
        }
        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.hex[..12.min(self.hex.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Stable identifier of a note, used as the checkpoint key.
///
/// Derived from title, creation time and raw markup so that two notes sharing
/// a title (common in real exports) do not collide, while re-reading the same
/// export yields the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A binary attachment of a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Decoded payload.
    pub data: Vec<u8>,
    /// Declared MIME type, e.g. `image/png`.
    pub mime: String,
    /// Hash declared by the producer. Verified against `data` when the
    /// resource index is built.
    pub hash: ContentHash,
    pub filename: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub source_url: Option<String>,
}

impl Resource {
    /// Build a resource whose declared hash is computed from `data`.
    pub fn from_bytes(data: Vec<u8>, mime: impl Into<String>) -> Self {
        let hash = ContentHash::compute(&data);
        Self {
            data,
            mime: mime.into(),
            hash,
            filename: None,
            width: None,
            height: None,
            source_url: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn is_image(&self) -> bool {
        is_image_mime(&self.mime)
    }

    pub fn is_pdf(&self) -> bool {
        is_pdf_mime(&self.mime)
    }

    /// File extension for the MIME type, `bin` when unknown.
    pub fn extension(&self) -> &'static str {
        match self.mime.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            "application/pdf" => "pdf",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
            "application/zip" | "application/x-zip-compressed" => "zip",
            "text/plain" => "txt",
            "text/markdown" => "md",
            _ => "bin",
        }
    }

    /// The declared file name, or `<hash>.<ext>`.
    pub fn display_name(&self) -> String {
        self.filename
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| format!("{}.{}", self.hash, self.extension()))
    }
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.trim().to_ascii_lowercase().starts_with("image/")
}

pub fn is_pdf_mime(mime: &str) -> bool {
    mime.trim().eq_ignore_ascii_case("application/pdf")
}

/// One note as produced by the container reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub title: String,
    /// Raw ENML markup.
    pub content: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub author: Option<String>,
    /// Originating application, e.g. `web.clip` or `mobile.android`.
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub resources: Vec<Resource>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            created: None,
            updated: None,
            tags: BTreeSet::new(),
            author: None,
            source: None,
            source_url: None,
            resources: Vec::new(),
        }
    }

    /// Checkpoint key for this note.
    pub fn id(&self) -> NoteId {
        let mut hasher = Md5::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        if let Some(created) = self.created {
            hasher.update(created.to_rfc3339().as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        NoteId(format!("{:x}", hasher.finalize()))
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_known_md5() {
        let h = ContentHash::compute(b"hello");
        assert_eq!(h.as_str(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn from_hex_normalises_case() {
        let h = ContentHash::from_hex("5D41402ABC4B2A76B9719D911017C592").unwrap();
        assert_eq!(h, ContentHash::compute(b"hello"));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert_eq!(
            ContentHash::from_hex("abc"),
            Err(ContentHashError::InvalidLength(3))
        );
        assert!(matches!(
            ContentHash::from_hex("zz41402abc4b2a76b9719d911017c592"),
            Err(ContentHashError::InvalidCharacter { position: 0, .. })
        ));
    }

    #[test]
    fn note_id_is_stable_and_content_sensitive() {
        let a = Note::new("Same title", "<en-note>a</en-note>");
        let b = Note::new("Same title", "<en-note>b</en-note>");
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn display_name_falls_back_to_hash() {
        let r = Resource::from_bytes(b"%PDF-1.4".to_vec(), "application/pdf");
        assert_eq!(r.display_name(), format!("{}.pdf", r.hash));
        assert!(r.is_pdf());
        assert!(!r.is_image());
        let named = r.with_filename("report.pdf");
        assert_eq!(named.display_name(), "report.pdf");
    }
}
