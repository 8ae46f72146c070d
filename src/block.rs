//! Target document model: blocks and annotated rich-text spans.
//!
//! The types mirror the Notion block model closely enough that
//! [`Block::to_notion`] is a straight structural mapping, while staying plain
//! Rust data the converter and tests can build and compare directly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum characters in one block's rich text (and in one span).
pub const MAX_RICH_TEXT_LEN: usize = 2000;

/// Maximum blocks accepted by one append call.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

/// Nesting levels of `children` the remote API accepts in a single request.
pub const MAX_NESTING_PER_REQUEST: usize = 2;

/// The fixed text-colour palette of the target format.
///
/// Declaration order is significant: it breaks distance ties in
/// [`crate::markup::color::nearest_color`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    #[default]
    Default,
    Gray,
    Brown,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Red,
    GrayBackground,
}

impl Color {
    /// Foreground palette in declaration order.
    pub const PALETTE: [Color; 10] = [
        Color::Default,
        Color::Gray,
        Color::Brown,
        Color::Orange,
        Color::Yellow,
        Color::Green,
        Color::Blue,
        Color::Purple,
        Color::Pink,
        Color::Red,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Default => "default",
            Color::Gray => "gray",
            Color::Brown => "brown",
            Color::Orange => "orange",
            Color::Yellow => "yellow",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Purple => "purple",
            Color::Pink => "pink",
            Color::Red => "red",
            Color::GrayBackground => "gray_background",
        }
    }

    /// Reference RGB of a palette entry (light theme text colours).
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Color::Default => (55, 53, 47),
            Color::Gray => (120, 119, 116),
            Color::Brown => (159, 107, 83),
            Color::Orange => (217, 115, 13),
            Color::Yellow => (203, 145, 47),
            Color::Green => (68, 131, 97),
            Color::Blue => (51, 126, 169),
            Color::Purple => (144, 101, 176),
            Color::Pink => (193, 76, 138),
            Color::Red => (212, 76, 71),
            Color::GrayBackground => (241, 241, 239),
        }
    }
}

/// Inline formatting active on a span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub color: Option<Color>,
    pub link: Option<String>,
}

impl Annotations {
    pub fn bold() -> Self {
        Self {
            bold: true,
            ..Self::default()
        }
    }
}

/// A run of text with one annotation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextSpan {
    pub text: String,
    pub annotations: Annotations,
}

impl RichTextSpan {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            annotations: Annotations::default(),
        }
    }

    pub fn new(text: impl Into<String>, annotations: Annotations) -> Self {
        Self {
            text: text.into(),
            annotations,
        }
    }

    /// Length in the unit the remote limit counts (Unicode scalar values).
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn to_notion(&self) -> Value {
        let mut text = json!({ "content": self.text });
        if let Some(ref url) = self.annotations.link {
            text["link"] = json!({ "url": url });
        }
        json!({
            "type": "text",
            "text": text,
            "annotations": {
                "bold": self.annotations.bold,
                "italic": self.annotations.italic,
                "strikethrough": self.annotations.strikethrough,
                "underline": self.annotations.underline,
                "code": self.annotations.code,
                "color": self.annotations.color.unwrap_or_default().as_str(),
            }
        })
    }
}

/// Total characters across a rich-text sequence.
pub fn rich_text_len(spans: &[RichTextSpan]) -> usize {
    spans.iter().map(RichTextSpan::len).sum()
}

/// Plain text of a rich-text sequence.
pub fn plain_text(spans: &[RichTextSpan]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

/// One structural unit of the target document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading {
        level: u8,
        rich_text: Vec<RichTextSpan>,
    },
    Paragraph {
        rich_text: Vec<RichTextSpan>,
    },
    BulletedItem {
        rich_text: Vec<RichTextSpan>,
        children: Vec<Block>,
    },
    NumberedItem {
        rich_text: Vec<RichTextSpan>,
        children: Vec<Block>,
    },
    ToDo {
        rich_text: Vec<RichTextSpan>,
        checked: bool,
    },
    Quote {
        rich_text: Vec<RichTextSpan>,
    },
    Divider,
    Code {
        rich_text: Vec<RichTextSpan>,
        language: String,
    },
    Callout {
        rich_text: Vec<RichTextSpan>,
        emoji: String,
        color: Color,
    },
    Table {
        width: usize,
        has_header: bool,
        children: Vec<Block>,
    },
    TableRow {
        cells: Vec<Vec<RichTextSpan>>,
    },
    Image {
        url: String,
    },
    File {
        url: String,
        name: Option<String>,
    },
    Pdf {
        url: String,
    },
}

impl Block {
    pub fn paragraph(rich_text: Vec<RichTextSpan>) -> Self {
        Block::Paragraph { rich_text }
    }

    pub fn empty_paragraph() -> Self {
        Block::Paragraph {
            rich_text: Vec::new(),
        }
    }

    /// Remote type tag, e.g. `heading_2` or `bulleted_list_item`.
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Heading { level: 1, .. } => "heading_1",
            Block::Heading { level: 2, .. } => "heading_2",
            Block::Heading { .. } => "heading_3",
            Block::Paragraph { .. } => "paragraph",
            Block::BulletedItem { .. } => "bulleted_list_item",
            Block::NumberedItem { .. } => "numbered_list_item",
            Block::ToDo { .. } => "to_do",
            Block::Quote { .. } => "quote",
            Block::Divider => "divider",
            Block::Code { .. } => "code",
            Block::Callout { .. } => "callout",
            Block::Table { .. } => "table",
            Block::TableRow { .. } => "table_row",
            Block::Image { .. } => "image",
            Block::File { .. } => "file",
            Block::Pdf { .. } => "pdf",
        }
    }

    pub fn rich_text(&self) -> Option<&[RichTextSpan]> {
        match self {
            Block::Heading { rich_text, .. }
            | Block::Paragraph { rich_text }
            | Block::BulletedItem { rich_text, .. }
            | Block::NumberedItem { rich_text, .. }
            | Block::ToDo { rich_text, .. }
            | Block::Quote { rich_text }
            | Block::Code { rich_text, .. }
            | Block::Callout { rich_text, .. } => Some(rich_text),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Block] {
        match self {
            Block::BulletedItem { children, .. }
            | Block::NumberedItem { children, .. }
            | Block::Table { children, .. } => children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Block>> {
        match self {
            Block::BulletedItem { children, .. }
            | Block::NumberedItem { children, .. }
            | Block::Table { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Whether every `children` array in this subtree holds at most `max`
    /// blocks.
    pub fn fits_request(&self, max: usize) -> bool {
        let children = self.children();
        children.len() <= max && children.iter().all(|c| c.fits_request(max))
    }

    /// Split off the children one request cannot carry.
    ///
    /// The returned block keeps its leading children while they fit: at most
    /// `max` of them, stopping before the first child that does not fit
    /// itself. The remaining children come back in order, to be appended
    /// under the created block once its id is known. Table rows split the
    /// same way.
    pub fn split_for_request(mut self, max: usize) -> (Block, Vec<Block>) {
        let Some(children) = self.children_mut() else {
            return (self, Vec::new());
        };
        let keep = children
            .iter()
            .take(max)
            .take_while(|c| c.fits_request(max))
            .count();
        let rest = children.split_off(keep);
        (self, rest)
    }

    /// Depth-first visit of this block and all descendants.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Block)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Whether this block or any descendant carries code.
    pub fn contains_code(&self) -> bool {
        let mut found = false;
        self.walk(&mut |b| {
            if matches!(b, Block::Code { .. })
                || b.rich_text()
                    .is_some_and(|rt| rt.iter().any(|s| s.annotations.code))
            {
                found = true;
            }
        });
        found
    }

    /// Encode as a remote API block object.
    pub fn to_notion(&self) -> Value {
        let kind = self.kind();
        let body = match self {
            Block::Heading { rich_text, .. } => json!({
                "rich_text": encode_rich_text(rich_text),
                "color": "default",
                "is_toggleable": false,
            }),
            Block::Paragraph { rich_text } | Block::Quote { rich_text } => json!({
                "rich_text": encode_rich_text(rich_text),
                "color": "default",
            }),
            Block::BulletedItem {
                rich_text,
                children,
            }
            | Block::NumberedItem {
                rich_text,
                children,
            } => {
                let mut body = json!({
                    "rich_text": encode_rich_text(rich_text),
                    "color": "default",
                });
                if !children.is_empty() {
                    body["children"] = Value::Array(children.iter().map(Block::to_notion).collect());
                }
                body
            }
            Block::ToDo { rich_text, checked } => json!({
                "rich_text": encode_rich_text(rich_text),
                "checked": checked,
                "color": "default",
            }),
            Block::Divider => json!({}),
            Block::Code {
                rich_text,
                language,
            } => json!({
                "rich_text": encode_rich_text(rich_text),
                "language": language,
            }),
            Block::Callout {
                rich_text,
                emoji,
                color,
            } => json!({
                "rich_text": encode_rich_text(rich_text),
                "icon": { "type": "emoji", "emoji": emoji },
                "color": color.as_str(),
            }),
            Block::Table {
                width,
                has_header,
                children,
            } => json!({
                "table_width": width,
                "has_column_header": has_header,
                "has_row_header": false,
                "children": children.iter().map(Block::to_notion).collect::<Vec<_>>(),
            }),
            Block::TableRow { cells } => json!({
                "cells": cells.iter().map(|c| encode_rich_text(c)).collect::<Vec<_>>(),
            }),
            Block::Image { url } | Block::Pdf { url } => json!({
                "type": "external",
                "external": { "url": url },
            }),
            Block::File { url, name } => {
                let mut body = json!({
                    "type": "external",
                    "external": { "url": url },
                });
                if let Some(name) = name {
                    body["caption"] = encode_rich_text(&[RichTextSpan::plain(name.clone())]);
                }
                body
            }
        };
        json!({ "object": "block", "type": kind, kind: body })
    }
}

fn encode_rich_text(spans: &[RichTextSpan]) -> Value {
    Value::Array(spans.iter().map(RichTextSpan::to_notion).collect())
}

/// Hoist children nested more than `max_depth` levels below a top-level
/// block so a single append call is accepted.
///
/// A hoisted subtree becomes a run of siblings at the deepest allowed level,
/// in document order.
pub fn flatten_nesting(blocks: Vec<Block>, max_depth: usize) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|b| flatten_block(b, 0, max_depth))
        .collect()
}

fn flatten_block(mut block: Block, depth: usize, max_depth: usize) -> Block {
    // Table rows are leaf-level structure, never hoisted.
    if matches!(block, Block::Table { .. }) {
        return block;
    }
    if let Some(children) = block.children_mut() {
        let taken = std::mem::take(children);
        if depth + 1 >= max_depth {
            for child in taken {
                children.extend(flatten_into_siblings(child));
            }
        } else {
            *children = taken
                .into_iter()
                .map(|c| flatten_block(c, depth + 1, max_depth))
                .collect();
        }
    }
    block
}

/// Turn a block and its whole subtree into a flat sibling list.
fn flatten_into_siblings(mut block: Block) -> Vec<Block> {
    if matches!(block, Block::Table { .. }) {
        return vec![block];
    }
    let mut out = Vec::new();
    let nested = block.children_mut().map(std::mem::take).unwrap_or_default();
    out.push(block);
    for child in nested {
        out.extend(flatten_into_siblings(child));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet(text: &str, children: Vec<Block>) -> Block {
        Block::BulletedItem {
            rich_text: vec![RichTextSpan::plain(text)],
            children,
        }
    }

    #[test]
    fn heading_kinds() {
        for (level, kind) in [(1, "heading_1"), (2, "heading_2"), (3, "heading_3")] {
            let b = Block::Heading {
                level,
                rich_text: vec![],
            };
            assert_eq!(b.kind(), kind);
        }
    }

    #[test]
    fn span_encodes_link_and_annotations() {
        let span = RichTextSpan::new(
            "docs",
            Annotations {
                bold: true,
                link: Some("https://example.com".into()),
                color: Some(Color::Red),
                ..Annotations::default()
            },
        );
        let v = Block::paragraph(vec![span]).to_notion();
        let rt = &v["paragraph"]["rich_text"][0];
        assert_eq!(rt["text"]["content"], "docs");
        assert_eq!(rt["text"]["link"]["url"], "https://example.com");
        assert_eq!(rt["annotations"]["bold"], true);
        assert_eq!(rt["annotations"]["color"], "red");
    }

    #[test]
    fn table_encoding_has_rows() {
        let table = Block::Table {
            width: 2,
            has_header: true,
            children: vec![
                Block::TableRow {
                    cells: vec![vec![RichTextSpan::plain("a")], vec![RichTextSpan::plain("b")]],
                },
                Block::TableRow {
                    cells: vec![vec![RichTextSpan::plain("1")], vec![]],
                },
            ],
        };
        let v = table.to_notion();
        assert_eq!(v["table"]["table_width"], 2);
        assert_eq!(v["table"]["has_column_header"], true);
        assert_eq!(v["table"]["children"].as_array().map(Vec::len), Some(2));
        assert_eq!(v["table"]["children"][0]["table_row"]["cells"][1][0]["text"]["content"], "b");
    }

    #[test]
    fn flatten_keeps_two_levels_and_hoists_the_rest() {
        let tree = vec![bullet(
            "l1",
            vec![bullet("l2", vec![bullet("l3", vec![bullet("l4", vec![])])])],
        )];
        let flat = flatten_nesting(tree, MAX_NESTING_PER_REQUEST);
        let l1 = &flat[0];
        assert_eq!(l1.children().len(), 1);
        let l2 = &l1.children()[0];
        let texts: Vec<String> = l2
            .children()
            .iter()
            .map(|b| plain_text(b.rich_text().unwrap_or_default()))
            .collect();
        // l4 hoisted beside l3
        assert_eq!(texts, vec!["l3", "l4"]);
        assert!(l2.children().iter().all(|b| b.children().is_empty()));
    }

    fn rows(n: usize) -> Vec<Block> {
        (0..n)
            .map(|i| Block::TableRow {
                cells: vec![vec![RichTextSpan::plain(i.to_string())]],
            })
            .collect()
    }

    #[test]
    fn oversized_table_keeps_first_hundred_rows() {
        let table = Block::Table {
            width: 1,
            has_header: false,
            children: rows(150),
        };
        assert!(!table.fits_request(MAX_BLOCKS_PER_REQUEST));
        let (head, rest) = table.split_for_request(MAX_BLOCKS_PER_REQUEST);
        assert_eq!(head.children(), &rows(150)[..100]);
        assert_eq!(rest, rows(150)[100..].to_vec());
        assert!(head.fits_request(MAX_BLOCKS_PER_REQUEST));
    }

    #[test]
    fn split_stops_before_a_child_that_does_not_fit() {
        let big = bullet("big", (0..101).map(|i| bullet(&i.to_string(), vec![])).collect());
        let item = bullet("top", vec![bullet("small", vec![]), big.clone(), bullet("after", vec![])]);
        let (head, rest) = item.split_for_request(MAX_BLOCKS_PER_REQUEST);
        assert_eq!(head.children(), &[bullet("small", vec![])]);
        assert_eq!(rest, vec![big, bullet("after", vec![])]);
    }

    #[test]
    fn block_that_fits_is_not_split() {
        let item = bullet("top", vec![bullet("a", vec![]), bullet("b", vec![])]);
        let (head, rest) = item.clone().split_for_request(MAX_BLOCKS_PER_REQUEST);
        assert_eq!(head, item);
        assert!(rest.is_empty());
        let (head, rest) = Block::Divider.split_for_request(MAX_BLOCKS_PER_REQUEST);
        assert_eq!(head, Block::Divider);
        assert!(rest.is_empty());
    }

    #[test]
    fn contains_code_sees_nested_spans() {
        let code_span = RichTextSpan::new(
            "x",
            Annotations {
                code: true,
                ..Annotations::default()
            },
        );
        let b = bullet("outer", vec![Block::paragraph(vec![code_span])]);
        assert!(b.contains_code());
        assert!(!bullet("plain", vec![]).contains_code());
    }
}
