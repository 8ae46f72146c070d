//! Page assembly: converted body + metadata callout + icon → [`PageSpec`].

use crate::block::{Annotations, Block, Color, RichTextSpan, MAX_RICH_TEXT_LEN};
use crate::markup::limits::pack_rich_text;
use crate::model::Note;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const METADATA_EMOJI: &str = "ℹ️";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UNTITLED: &str = "Untitled";

/// Where new pages are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    /// Child pages of a page. Only the title property exists.
    #[default]
    Page,
    /// Rows of a database carrying Tags / Created / Updated / Author /
    /// Source / Source URL properties.
    Database,
}

/// Page icon, chosen by the first matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageIcon {
    Code,
    Pdf,
    Image,
    Tagged,
    Note,
}

impl PageIcon {
    pub fn emoji(self) -> &'static str {
        match self {
            PageIcon::Code => "💻",
            PageIcon::Pdf => "📄",
            PageIcon::Image => "🖼️",
            PageIcon::Tagged => "🏷️",
            PageIcon::Note => "📝",
        }
    }
}

/// A typed page property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    MultiSelect(Vec<String>),
    Date(DateTime<Utc>),
    Url(String),
}

impl PropertyValue {
    pub fn to_notion(&self) -> Value {
        let text = |s: &str| json!([{ "type": "text", "text": { "content": s } }]);
        match self {
            PropertyValue::Title(s) => json!({ "title": text(s) }),
            PropertyValue::RichText(s) => json!({ "rich_text": text(s) }),
            PropertyValue::MultiSelect(names) => json!({
                "multi_select": names.iter().map(|n| json!({ "name": n })).collect::<Vec<_>>()
            }),
            PropertyValue::Date(d) => json!({
                "date": { "start": d.to_rfc3339_opts(SecondsFormat::Secs, true) }
            }),
            PropertyValue::Url(u) => json!({ "url": u }),
        }
    }
}

/// Everything needed to create one page and fill it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpec {
    pub parent_id: String,
    pub parent_kind: ParentKind,
    pub title: String,
    pub icon: PageIcon,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Body in document order, metadata first.
    pub children: Vec<Block>,
}

impl PageSpec {
    /// Page-create request body (content is appended separately).
    pub fn create_body(&self) -> Value {
        let parent = match self.parent_kind {
            ParentKind::Page => json!({ "type": "page_id", "page_id": self.parent_id }),
            ParentKind::Database => {
                json!({ "type": "database_id", "database_id": self.parent_id })
            }
        };
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_notion()))
            .collect();
        json!({
            "parent": parent,
            "icon": { "type": "emoji", "emoji": self.icon.emoji() },
            "properties": properties,
        })
    }
}

/// Builds [`PageSpec`]s for one migration target.
#[derive(Debug, Clone)]
pub struct PageAssembler {
    parent_id: String,
    parent_kind: ParentKind,
    include_metadata: bool,
}

impl PageAssembler {
    pub fn new(parent_id: impl Into<String>, parent_kind: ParentKind) -> Self {
        Self {
            parent_id: parent_id.into(),
            parent_kind,
            include_metadata: true,
        }
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn assemble(&self, note: &Note, blocks: Vec<Block>) -> PageSpec {
        let icon = select_icon(note, &blocks);
        let title = page_title(note);

        let mut properties = BTreeMap::new();
        properties.insert("title".to_string(), PropertyValue::Title(title.clone()));
        if self.parent_kind == ParentKind::Database {
            properties.extend(database_properties(note));
        }

        let mut children = Vec::with_capacity(blocks.len() + 2);
        if self.include_metadata {
            children.extend(metadata_blocks(note));
        }
        children.extend(blocks);

        PageSpec {
            parent_id: self.parent_id.clone(),
            parent_kind: self.parent_kind,
            title,
            icon,
            properties,
            children,
        }
    }
}

/// Code → PDF resource → image resource → tags → default.
///
/// Code is judged from the converted blocks, so markup the converter drops
/// does not count.
pub fn select_icon(note: &Note, blocks: &[Block]) -> PageIcon {
    if blocks.iter().any(Block::contains_code) {
        PageIcon::Code
    } else if note.resources.iter().any(|r| r.is_pdf()) {
        PageIcon::Pdf
    } else if note.resources.iter().any(|r| r.is_image()) {
        PageIcon::Image
    } else if !note.tags.is_empty() {
        PageIcon::Tagged
    } else {
        PageIcon::Note
    }
}

fn page_title(note: &Note) -> String {
    let title = note.title.trim();
    if title.is_empty() {
        return UNTITLED.to_string();
    }
    title.chars().take(MAX_RICH_TEXT_LEN).collect()
}

/// The metadata lines shown in the callout, in display order.
pub fn metadata_lines(note: &Note) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(created) = note.created {
        lines.push(format!("📅 Created: {}", created.format(TIMESTAMP_FORMAT)));
    }
    if let Some(updated) = note.updated {
        lines.push(format!("🔄 Updated: {}", updated.format(TIMESTAMP_FORMAT)));
    }
    if let Some(author) = non_empty(&note.author) {
        lines.push(format!("👤 Author: {author}"));
    }
    if let Some(url) = non_empty(&note.source_url) {
        lines.push(format!("🔗 Source: {url}"));
    }
    if let Some(source) = non_empty(&note.source) {
        lines.push(format!("📱 Source App: {source}"));
    }
    if !note.tags.is_empty() {
        let tags: Vec<String> = note.tags.iter().map(|t| format!("#{t}")).collect();
        lines.push(format!("🏷️ Tags: {}", tags.join(", ")));
    }
    if !note.resources.is_empty() {
        lines.push(format!("📎 Attachments: {}", note.resources.len()));
    }
    lines
}

fn metadata_blocks(note: &Note) -> Vec<Block> {
    let lines = metadata_lines(note);
    if lines.is_empty() {
        return Vec::new();
    }
    let span = RichTextSpan::new(lines.join("\n"), Annotations::default());
    let mut blocks: Vec<Block> = pack_rich_text(vec![span], MAX_RICH_TEXT_LEN)
        .into_iter()
        .map(|rich_text| Block::Callout {
            rich_text,
            emoji: METADATA_EMOJI.to_string(),
            color: Color::GrayBackground,
        })
        .collect();
    blocks.push(Block::Divider);
    blocks
}

fn database_properties(note: &Note) -> Vec<(String, PropertyValue)> {
    let mut props = Vec::new();
    if !note.tags.is_empty() {
        // Select option names may not contain commas.
        let names = note.tags.iter().map(|t| t.replace(',', " ")).collect();
        props.push(("Tags".to_string(), PropertyValue::MultiSelect(names)));
    }
    if let Some(created) = note.created {
        props.push(("Created".to_string(), PropertyValue::Date(created)));
    }
    if let Some(updated) = note.updated {
        props.push(("Updated".to_string(), PropertyValue::Date(updated)));
    }
    if let Some(author) = non_empty(&note.author) {
        props.push(("Author".to_string(), PropertyValue::RichText(author.to_string())));
    }
    if let Some(url) = non_empty(&note.source_url) {
        props.push(("Source URL".to_string(), PropertyValue::Url(url.to_string())));
    }
    if let Some(source) = non_empty(&note.source) {
        props.push(("Source".to_string(), PropertyValue::RichText(source.to_string())));
    }
    props
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
