//! Streaming `.enex` reader.
//!
//! An Evernote export is one `<en-export>` element holding `<note>` records:
//!
//! ```text
//! <note>
//!   <title>…</title>
//!   <content><![CDATA[<?xml …?><!DOCTYPE en-note …><en-note>…</en-note>]]></content>
//!   <created>20200101T120000Z</created>  <updated>…</updated>
//!   <tag>…</tag>*
//!   <note-attributes><author/><source/><source-url/></note-attributes>
//!   <resource>*
//!     <data encoding="base64">…</data>  <mime>image/png</mime>
//!     <width/> <height/>
//!     <resource-attributes><file-name/><source-url/></resource-attributes>
//!   </resource>
//! </note>
//! ```
//!
//! Notes are yielded one at a time; the file is never held in memory as a
//! tree, and a malformed record ends the stream without taking the notes
//! before it along. [`count_notes`] gives a progress total up front. Resource hashes are computed from the decoded payload, which is how
//! `<en-media hash="…">` refers to them. A resource that cannot be decoded is
//! dropped with a warning; a bad timestamp becomes `None`.

use crate::error::MigrateError;
use crate::model::{Note, Resource};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ENEX_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

/// Summary of an export, for `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EnexSummary {
    pub notes: usize,
    pub resources: usize,
    pub resource_bytes: u64,
    pub tags: BTreeSet<String>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PartialResource {
    data: Option<Vec<u8>>,
    mime: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    filename: Option<String>,
    source_url: Option<String>,
    encoding: Option<String>,
}

impl PartialResource {
    fn finish(self, note_title: &str) -> Option<Resource> {
        let Some(data) = self.data else {
            warn!("Resource without data in '{}' skipped", note_title);
            return None;
        };
        let mime = self
            .mime
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let mut resource = Resource::from_bytes(data, mime);
        resource.filename = self.filename.filter(|f| !f.is_empty());
        resource.width = self.width;
        resource.height = self.height;
        resource.source_url = self.source_url.filter(|u| !u.is_empty());
        Some(resource)
    }
}

/// Pull-based reader over any buffered source.
pub struct EnexReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    source: PathBuf,
    done: bool,
}

impl EnexReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MigrateError> {
        let path = path.as_ref();
        Ok(Self::new(open_export(path)?, path))
    }
}

fn open_export(path: &Path) -> Result<BufReader<File>, MigrateError> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MigrateError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            MigrateError::InvalidExport {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        }
    })?;
    Ok(BufReader::new(file))
}

impl<R: BufRead> EnexReader<R> {
    /// `source` only labels errors.
    pub fn new(source: R, label: impl Into<PathBuf>) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            source: label.into(),
            done: false,
        }
    }

    fn error(&self, detail: impl Into<String>) -> MigrateError {
        MigrateError::InvalidExport {
            path: self.source.clone(),
            detail: format!(
                "at byte {}: {}",
                self.reader.buffer_position(),
                detail.into()
            ),
        }
    }

    /// Advance to the next `<note>` and read it. `Ok(None)` at end of file.
    pub fn next_note(&mut self) -> Result<Option<Note>, MigrateError> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| e.to_string());
            let at_note = match event {
                Err(detail) => {
                    self.done = true;
                    return Err(self.error(detail));
                }
                Ok(Event::Start(ref e)) => e.name().as_ref() == b"note",
                Ok(Event::Eof) => {
                    self.done = true;
                    return Ok(None);
                }
                Ok(_) => false,
            };
            if at_note {
                return self.read_note().map(Some);
            }
        }
    }

    fn read_note(&mut self) -> Result<Note, MigrateError> {
        let mut note = Note::new("", "");
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut resource: Option<PartialResource> = None;

        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map(Event::into_owned)
                .map_err(|e| e.to_string());
            let event = match event {
                Ok(ev) => ev,
                Err(detail) => {
                    self.done = true;
                    return Err(self.error(detail));
                }
            };
            match event {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "resource" && path.is_empty() {
                        resource = Some(PartialResource::default());
                    }
                    if name == "data" {
                        if let Some(r) = resource.as_mut() {
                            r.encoding = e
                                .try_get_attribute("encoding")
                                .ok()
                                .flatten()
                                .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                        }
                    }
                    path.push(name);
                    text.clear();
                }
                Event::Text(t) => match t.unescape() {
                    Ok(s) => text.push_str(&s),
                    Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
                },
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
                Event::End(e) => {
                    if e.name().as_ref() == b"note" && path.is_empty() {
                        break;
                    }
                    let value = std::mem::take(&mut text);
                    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                    match segments.as_slice() {
                        ["resource"] => {
                            if let Some(r) = resource.take().and_then(|r| r.finish(&note.title)) {
                                note.resources.push(r);
                            }
                        }
                        ["resource", field @ ..] => {
                            if let Some(r) = resource.as_mut() {
                                apply_resource_field(r, field, value, &note.title);
                            }
                        }
                        _ => apply_note_field(&mut note, &segments, value),
                    }
                    path.pop();
                }
                Event::Eof => {
                    self.done = true;
                    return Err(self.error("unexpected end of file inside <note>"));
                }
                _ => {}
            }
        }

        if note.title.trim().is_empty() {
            note.title = "Untitled".to_string();
        }
        if note.updated.is_none() {
            note.updated = note.created;
        }
        debug!(
            "Read note '{}' ({} resources, {} tags)",
            note.title,
            note.resources.len(),
            note.tags.len()
        );
        Ok(note)
    }
}

impl<R: BufRead> Iterator for EnexReader<R> {
    type Item = Result<Note, MigrateError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_note().transpose()
    }
}

fn apply_note_field(note: &mut Note, path: &[&str], value: String) {
    match path {
        ["title"] => note.title = value.trim().to_string(),
        ["content"] => note.content = value.trim().to_string(),
        ["created"] => note.created = parse_timestamp(&value),
        ["updated"] => note.updated = parse_timestamp(&value),
        ["tag"] => {
            let tag = value.trim();
            if !tag.is_empty() {
                note.tags.insert(tag.to_string());
            }
        }
        ["note-attributes", "author"] => note.author = non_empty(value),
        ["note-attributes", "source"] => note.source = non_empty(value),
        ["note-attributes", "source-url"] => note.source_url = non_empty(value),
        _ => {}
    }
}

fn apply_resource_field(r: &mut PartialResource, field: &[&str], value: String, note_title: &str) {
    match field {
        ["data"] => {
            let encoding = r.encoding.as_deref().unwrap_or("base64");
            if !encoding.eq_ignore_ascii_case("base64") {
                warn!("Unsupported resource encoding '{}' in '{}'", encoding, note_title);
                return;
            }
            let compact: String = value.split_ascii_whitespace().collect();
            match STANDARD.decode(compact.as_bytes()) {
                Ok(bytes) => r.data = Some(bytes),
                Err(e) => warn!("Undecodable resource in '{}': {}", note_title, e),
            }
        }
        ["mime"] => r.mime = non_empty(value),
        ["width"] => r.width = value.trim().parse().ok(),
        ["height"] => r.height = value.trim().parse().ok(),
        ["resource-attributes", "file-name"] => r.filename = non_empty(value),
        ["resource-attributes", "source-url"] => r.source_url = non_empty(value),
        _ => {}
    }
}

fn non_empty(value: String) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// `yyyyMMddTHHmmssZ`, falling back to RFC 3339.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, ENEX_TIMESTAMP)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|d| d.with_timezone(&Utc)))
        .map_err(|_| warn!("Unparseable timestamp '{}'", value))
        .ok()
}

/// Read every note of an export.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<Note>, MigrateError> {
    EnexReader::open(path)?.collect()
}

/// Number of `<note>` records in an export.
///
/// Nothing is decoded, so this is a cheap first pass for progress totals.
/// Counting stops at the first malformed element; [`EnexReader`] reports it
/// when it gets there.
pub fn count_notes(path: impl AsRef<Path>) -> Result<usize, MigrateError> {
    let path = path.as_ref();
    let mut reader = Reader::from_reader(open_export(path)?);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"note" => count += 1,
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(
                    "Note count of {} stopped at byte {}: {}",
                    path.display(),
                    reader.buffer_position(),
                    e
                );
                break;
            }
            Ok(_) => {}
        }
        buf.clear();
    }
    Ok(count)
}

/// Count notes, resources and tags without converting anything.
pub fn inspect(path: impl AsRef<Path>) -> Result<EnexSummary, MigrateError> {
    let mut summary = EnexSummary::default();
    for note in EnexReader::open(path)? {
        let note = note?;
        summary.notes += 1;
        summary.resources += note.resources.len();
        summary.resource_bytes += note.resources.iter().map(|r| r.data.len() as u64).sum::<u64>();
        summary.tags.extend(note.tags.iter().cloned());
        if let Some(created) = note.created {
            summary.oldest = Some(summary.oldest.map_or(created, |o| o.min(created)));
            summary.newest = Some(summary.newest.map_or(created, |n| n.max(created)));
        }
    }
    Ok(summary)
}
