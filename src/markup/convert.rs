//! Markup tree → target blocks.
//!
//! Depth-first recursive descent over the [`Element`] tree with two modes:
//!
//! * **block context**: children of structural containers (`en-note`,
//!   `div`, `li`, …). Inline content accumulates into a *run* which is
//!   flushed into paragraph / to-do blocks whenever a block-level element
//!   interrupts it;
//! * **inline context**: children of formatting elements, collected into
//!   annotated spans. An inline element that (transitively) contains a
//!   block-level element is processed in block context instead, carrying its
//!   annotations down.
//!
//! Annotations are threaded as an immutable value: every element derives the
//! set for its children from its parent's set, so a span's annotations are
//! the union of all enclosing formatting elements.
//!
//! Tags are dispatched through a static `TAG_TABLE`. Anything not in the table is
//! unwrapped (children kept, own formatting dropped) with a warning.
//!
//! The conversion is a pure function of the tree and the resource index.

use super::color::map_color;
use super::entities::decode_entities;
use super::limits::{pack_rich_text, split_cell};
use super::{Element, MarkupNode};
use crate::block::{Annotations, Block, RichTextSpan, MAX_RICH_TEXT_LEN};
use crate::error::ConversionWarning;
use crate::resources::ResourceIndex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Blocks produced for one note, plus everything that was dropped on the way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversion {
    pub blocks: Vec<Block>,
    pub warnings: Vec<ConversionWarning>,
}

/// Convert a parsed note body using the default rich-text limit.
pub fn convert(root: &Element, index: &ResourceIndex) -> Conversion {
    convert_with_limit(root, index, MAX_RICH_TEXT_LEN)
}

/// Convert a parsed note body, splitting rich text at `limit` characters.
pub fn convert_with_limit(root: &Element, index: &ResourceIndex, limit: usize) -> Conversion {
    let mut converter = Converter {
        index,
        limit: limit.clamp(1, MAX_RICH_TEXT_LEN),
        warnings: Vec::new(),
        unsupported_seen: BTreeSet::new(),
    };
    let mut blocks = Vec::new();
    converter.blocks_of(root, &Annotations::default(), &mut blocks);
    Conversion {
        blocks,
        warnings: converter.warnings,
    }
}

// ── Tag dispatch ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    /// Document wrapper; children are blocks.
    Root,
    /// `div` / `p`: a paragraph, or a wrapper around nested blocks.
    Container,
    Heading(u8),
    List { ordered: bool },
    ListItem,
    Todo,
    Table,
    TableSection,
    Row,
    Cell,
    Media,
    Image,
    Break,
    Rule,
    Quote,
    Pre,
    Inline(InlineStyle),
    /// Dropped with its whole subtree.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineStyle {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    Link,
    Plain,
}

impl TagKind {
    fn is_block(self) -> bool {
        !matches!(
            self,
            TagKind::Inline(_) | TagKind::Break | TagKind::Todo | TagKind::Ignore
        )
    }
}

static TAG_TABLE: Lazy<HashMap<&'static str, TagKind>> = Lazy::new(|| {
    use InlineStyle::*;
    use TagKind::*;
    let mut table = HashMap::new();
    let mut add = |names: &[&'static str], kind: TagKind| {
        for name in names {
            table.insert(*name, kind);
        }
    };
    add(&["en-note", "body", "html"], Root);
    add(
        &[
            "div", "p", "section", "article", "header", "footer", "main", "center", "address",
            "figure", "figcaption", "dl", "dt", "dd", "caption",
        ],
        Container,
    );
    add(&["h1"], Heading(1));
    add(&["h2"], Heading(2));
    add(&["h3"], Heading(3));
    add(&["h4"], Heading(4));
    add(&["h5"], Heading(5));
    add(&["h6"], Heading(6));
    add(&["ul"], List { ordered: false });
    add(&["ol"], List { ordered: true });
    add(&["li"], ListItem);
    add(&["en-todo"], Todo);
    add(&["table"], Table);
    add(&["thead", "tbody", "tfoot"], TableSection);
    add(&["tr"], Row);
    add(&["td", "th"], Cell);
    add(&["en-media"], Media);
    add(&["img"], Image);
    add(&["br"], Break);
    add(&["hr"], Rule);
    add(&["blockquote"], Quote);
    add(&["pre"], Pre);
    add(&["b", "strong"], Inline(Bold));
    add(&["i", "em", "cite", "dfn", "var"], Inline(Italic));
    add(&["u", "ins"], Inline(Underline));
    add(&["s", "strike", "del"], Inline(Strikethrough));
    add(&["code", "tt", "kbd", "samp"], Inline(Code));
    add(&["a"], Inline(Link));
    add(
        &[
            "span", "font", "sup", "sub", "small", "big", "abbr", "acronym", "q", "mark",
            "label", "bdo", "nobr",
        ],
        Inline(Plain),
    );
    add(
        &[
            "head", "title", "style", "script", "meta", "en-crypt", "object", "embed", "map",
            "area", "colgroup", "col", "input", "button", "form", "select", "textarea", "iframe",
        ],
        Ignore,
    );
    table
});

fn lookup(name: &str) -> Option<TagKind> {
    TAG_TABLE.get(name).copied()
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n]+").unwrap());

/// Link schemes the target accepts as URLs.
const LINK_SCHEMES: &[&str] = &["http://", "https://", "mailto:", "ftp://", "tel:"];

/// ENML carries no language hint for code blocks.
const CODE_LANGUAGE: &str = "plain text";

// ── Inline runs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Inline {
    Span(RichTextSpan),
    Break(Annotations),
    /// Checkbox marker; the inline content after it forms a to-do.
    Todo(bool),
}

struct Converter<'a> {
    index: &'a ResourceIndex,
    limit: usize,
    warnings: Vec<ConversionWarning>,
    unsupported_seen: BTreeSet<String>,
}

impl Converter<'_> {
    // ── Block context ────────────────────────────────────────────────────

    /// Convert `el`'s children as blocks. Returns whether a line break was
    /// seen in the inline content.
    fn blocks_of(&mut self, el: &Element, ann: &Annotations, out: &mut Vec<Block>) -> bool {
        let mut run = Vec::new();
        let mut saw_break = false;
        for child in &el.children {
            match child {
                MarkupNode::Text(text) => push_text(text, ann, &mut run),
                MarkupNode::Element(e) => match lookup(&e.name) {
                    Some(kind) if kind.is_block() || has_block_descendant(e) => {
                        saw_break |= self.flush_run(&mut run, out);
                        self.block_element(e, kind, ann, out);
                    }
                    None if has_block_descendant(e) => {
                        saw_break |= self.flush_run(&mut run, out);
                        self.warn_unsupported(e);
                        self.blocks_of(e, ann, out);
                    }
                    kind => self.inline_element(e, kind, ann, &mut run),
                },
            }
        }
        saw_break |= self.flush_run(&mut run, out);
        saw_break
    }

    fn block_element(&mut self, e: &Element, kind: TagKind, ann: &Annotations, out: &mut Vec<Block>) {
        match kind {
            TagKind::Root | TagKind::TableSection | TagKind::Row | TagKind::Cell => {
                let ann = self.with_color(e, ann);
                self.blocks_of(e, &ann, out);
            }
            TagKind::Container => self.container(e, ann, out),
            TagKind::Heading(level) => self.heading(e, level, ann, out),
            TagKind::List { ordered } => self.list(e, ordered, ann, out),
            TagKind::ListItem => self.list_item(e, false, ann, out),
            TagKind::Table => self.table(e, ann, out),
            TagKind::Media => self.media(e, out),
            TagKind::Image => self.image(e, out),
            TagKind::Rule => out.push(Block::Divider),
            TagKind::Quote => self.quote(e, ann, out),
            TagKind::Pre => self.code_block(e, out),
            TagKind::Inline(style) => {
                let ann = self.annotate(e, style, ann);
                self.blocks_of(e, &ann, out);
            }
            TagKind::Todo => out.push(Block::ToDo {
                rich_text: Vec::new(),
                checked: is_checked(e),
            }),
            TagKind::Break | TagKind::Ignore => {}
        }
    }

    fn container(&mut self, e: &Element, ann: &Annotations, out: &mut Vec<Block>) {
        if is_code_block(e) {
            return self.code_block(e, out);
        }
        let ann = self.with_color(e, ann);
        let start = out.len();
        let saw_break = self.blocks_of(e, &ann, out);
        if out.len() == start && saw_break {
            out.push(Block::empty_paragraph());
        }
    }

    fn heading(&mut self, e: &Element, level: u8, ann: &Annotations, out: &mut Vec<Block>) {
        let mut ann = self.with_color(e, ann);
        if level > 3 {
            ann.bold = true;
        }
        let spans = self.collect_spans(e, &ann);
        if is_blank(&spans) {
            return;
        }
        for rich_text in pack_rich_text(spans, self.limit) {
            out.push(Block::Heading {
                level: level.min(3),
                rich_text,
            });
        }
    }

    fn list(&mut self, e: &Element, ordered: bool, ann: &Annotations, out: &mut Vec<Block>) {
        let ann = self.with_color(e, ann);
        let start = out.len();
        for child in &e.children {
            match child {
                MarkupNode::Text(text) => {
                    let text = decode_entities(text);
                    if !text.trim().is_empty() {
                        let spans = normalize(vec![RichTextSpan::new(
                            collapse_whitespace(&text),
                            ann.clone(),
                        )]);
                        out.push(list_block(ordered, spans, Vec::new()));
                    }
                }
                MarkupNode::Element(c) => match lookup(&c.name) {
                    Some(TagKind::List { ordered: nested_ordered }) => {
                        let mut nested = Vec::new();
                        self.list(c, nested_ordered, &ann, &mut nested);
                        // A list directly inside a list belongs to the previous item.
                        let previous = if out.len() > start { out.last_mut() } else { None };
                        match previous.and_then(Block::children_mut) {
                            Some(children) => children.extend(nested),
                            None => out.extend(nested),
                        }
                    }
                    Some(TagKind::Ignore) => {}
                    _ => self.list_item(c, ordered, &ann, out),
                },
            }
        }
    }

    fn list_item(&mut self, li: &Element, ordered: bool, ann: &Annotations, out: &mut Vec<Block>) {
        let ann = self.with_color(li, ann);
        let mut children = Vec::new();
        self.blocks_of(li, &ann, &mut children);
        // A checklist item is a to-do in the list's place; whatever follows
        // it in the item stays beside it.
        if matches!(children.first(), Some(Block::ToDo { .. })) {
            out.extend(children);
            return;
        }
        // The item's own text is its leading paragraph.
        let leads_with_text = matches!(children.first(), Some(Block::Paragraph { .. }));
        let rich_text = match leads_with_text.then(|| children.remove(0)) {
            Some(Block::Paragraph { rich_text }) => rich_text,
            _ => Vec::new(),
        };
        out.push(list_block(ordered, rich_text, children));
    }

    fn table(&mut self, e: &Element, ann: &Annotations, out: &mut Vec<Block>) {
        let ann = self.with_color(e, ann);
        let mut rows = Vec::new();
        collect_rows(e, &mut rows);

        let Some(first) = rows.first() else {
            return;
        };
        let first_cells = cells_of(first);
        let width = first_cells.len();
        if width == 0 {
            return;
        }
        let has_header = first_cells.iter().all(|c| c.name == "th");

        let mut children = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let cells = cells_of(row);
            if cells.len() > width {
                self.warnings.push(ConversionWarning::RowTruncated {
                    row: row_index,
                    cells: cells.len(),
                    width,
                });
            }
            let mut rich: Vec<Vec<RichTextSpan>> = cells
                .iter()
                .take(width)
                .map(|cell| {
                    let cell_ann = self.with_color(cell, &ann);
                    let spans = self.collect_spans(cell, &cell_ann);
                    split_cell(spans, self.limit)
                })
                .collect();
            rich.resize(width, Vec::new());
            children.push(Block::TableRow { cells: rich });
        }

        out.push(Block::Table {
            width,
            has_header,
            children,
        });
    }

    fn media(&mut self, e: &Element, out: &mut Vec<Block>) {
        let hash = e.attr("hash").unwrap_or_default().trim();
        let Some(entry) = self.index.lookup(hash) else {
            self.warnings.push(ConversionWarning::MissingMedia {
                hash: hash.to_string(),
            });
            return;
        };
        let Some(url) = entry.uploaded_url() else {
            self.warnings.push(ConversionWarning::MediaNotUploaded {
                hash: hash.to_ascii_lowercase(),
            });
            return;
        };
        let resource = &entry.resource;
        let url = url.to_string();
        out.push(if resource.is_image() {
            Block::Image { url }
        } else if resource.is_pdf() {
            Block::Pdf { url }
        } else {
            Block::File {
                url,
                name: Some(resource.display_name()),
            }
        });
    }

    fn image(&mut self, e: &Element, out: &mut Vec<Block>) {
        let src = e.attr("src").unwrap_or_default().trim();
        if src.starts_with("https://") {
            out.push(Block::Image {
                url: src.to_string(),
            });
        } else {
            // data: URIs and plain http are not embeddable.
            let shown: String = src.chars().take(60).collect();
            self.warnings
                .push(ConversionWarning::UnsupportedImageSource { src: shown });
        }
    }

    fn quote(&mut self, e: &Element, ann: &Annotations, out: &mut Vec<Block>) {
        let ann = self.with_color(e, ann);
        let spans = self.collect_spans(e, &ann);
        if is_blank(&spans) {
            return;
        }
        for rich_text in pack_rich_text(spans, self.limit) {
            out.push(Block::Quote { rich_text });
        }
    }

    fn code_block(&mut self, e: &Element, out: &mut Vec<Block>) {
        let mut text = String::new();
        raw_text(e, &mut text);
        let text = text.replace('\u{a0}', " ");
        let text = text.trim_end_matches('\n');
        if text.trim().is_empty() {
            return;
        }
        for rich_text in pack_rich_text(vec![RichTextSpan::plain(text)], self.limit) {
            out.push(Block::Code {
                rich_text,
                language: CODE_LANGUAGE.to_string(),
            });
        }
    }

    /// Flush the pending run into paragraph / to-do blocks. Returns whether
    /// the run contained a line break.
    fn flush_run(&mut self, run: &mut Vec<Inline>, out: &mut Vec<Block>) -> bool {
        if run.is_empty() {
            return false;
        }
        let items = std::mem::take(run);
        let saw_break = items.iter().any(|i| matches!(i, Inline::Break(_)));

        let mut segments: Vec<(Option<bool>, Vec<RichTextSpan>)> = vec![(None, Vec::new())];
        for item in items {
            match item {
                Inline::Todo(checked) => segments.push((Some(checked), Vec::new())),
                other => {
                    if let (Some(span), Some(segment)) = (inline_to_span(other), segments.last_mut()) {
                        segment.1.push(span);
                    }
                }
            }
        }

        for (todo, spans) in segments {
            let spans = normalize(spans);
            match todo {
                None if is_blank(&spans) => {}
                None => {
                    for rich_text in pack_rich_text(spans, self.limit) {
                        out.push(Block::Paragraph { rich_text });
                    }
                }
                Some(checked) => {
                    for rich_text in pack_rich_text(spans, self.limit) {
                        out.push(Block::ToDo { rich_text, checked });
                    }
                }
            }
        }
        saw_break
    }

    // ── Inline context ───────────────────────────────────────────────────

    fn inline_element(
        &mut self,
        e: &Element,
        kind: Option<TagKind>,
        ann: &Annotations,
        run: &mut Vec<Inline>,
    ) {
        match kind {
            Some(TagKind::Inline(style)) => {
                let ann = self.annotate(e, style, ann);
                self.inline_children(e, &ann, run);
            }
            Some(TagKind::Break) => run.push(Inline::Break(ann.clone())),
            Some(TagKind::Todo) => run.push(Inline::Todo(is_checked(e))),
            Some(TagKind::Ignore) => {}
            // Embedded objects have no text form.
            Some(TagKind::Media | TagKind::Image | TagKind::Rule) => {}
            // Structure inside a text-only context (heading, quote, cell) is
            // flattened to lines.
            Some(kind) => {
                let ann = self.with_color(e, ann);
                self.inline_children(e, &ann, run);
                match kind {
                    TagKind::Cell => run.push(Inline::Span(RichTextSpan::new(" ", ann))),
                    TagKind::Root | TagKind::TableSection | TagKind::Table => {}
                    _ => run.push(Inline::Break(ann)),
                }
            }
            None => {
                self.warn_unsupported(e);
                self.inline_children(e, ann, run);
            }
        }
    }

    fn inline_children(&mut self, e: &Element, ann: &Annotations, run: &mut Vec<Inline>) {
        for child in &e.children {
            match child {
                MarkupNode::Text(text) => push_text(text, ann, run),
                MarkupNode::Element(c) => self.inline_element(c, lookup(&c.name), ann, run),
            }
        }
    }

    /// All text under `e` as normalized spans, structure flattened.
    fn collect_spans(&mut self, e: &Element, ann: &Annotations) -> Vec<RichTextSpan> {
        let mut run = Vec::new();
        self.inline_children(e, ann, &mut run);
        normalize(run.into_iter().filter_map(inline_to_span).collect())
    }

    // ── Annotations ──────────────────────────────────────────────────────

    fn annotate(&mut self, e: &Element, style: InlineStyle, ann: &Annotations) -> Annotations {
        let mut next = self.with_color(e, ann);
        match style {
            InlineStyle::Bold => next.bold = true,
            InlineStyle::Italic => next.italic = true,
            InlineStyle::Underline => next.underline = true,
            InlineStyle::Strikethrough => next.strikethrough = true,
            InlineStyle::Code => next.code = true,
            InlineStyle::Link => {
                if let Some(href) = e.attr("href").map(str::trim).filter(|h| is_linkable(h)) {
                    next.link = Some(href.to_string());
                }
            }
            InlineStyle::Plain => {}
        }
        next
    }

    /// Apply a foreground colour declared on `e` (style or `<font color>`).
    fn with_color(&mut self, e: &Element, ann: &Annotations) -> Annotations {
        let mut next = ann.clone();
        let value = e.style_property("color").or_else(|| {
            (e.name == "font")
                .then(|| e.attr("color").map(str::to_string))
                .flatten()
        });
        if let Some(value) = value {
            match map_color(&value) {
                Some(color) => next.color = Some(color),
                None => self
                    .warnings
                    .push(ConversionWarning::UnknownColor { value }),
            }
        }
        next
    }

    fn warn_unsupported(&mut self, e: &Element) {
        if self.unsupported_seen.insert(e.name.clone()) {
            self.warnings.push(ConversionWarning::UnsupportedTag {
                tag: e.name.clone(),
            });
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn has_block_descendant(e: &Element) -> bool {
    e.child_elements().any(|c| match lookup(&c.name) {
        Some(kind) if kind.is_block() => true,
        Some(TagKind::Ignore) => false,
        _ => has_block_descendant(c),
    })
}

fn is_checked(e: &Element) -> bool {
    e.attr("checked")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn is_code_block(e: &Element) -> bool {
    ["-en-codeblock", "--en-codeblock"]
        .iter()
        .any(|p| e.style_property(p).is_some_and(|v| v.eq_ignore_ascii_case("true")))
}

fn is_linkable(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    LINK_SCHEMES
        .iter()
        .any(|s| lower.starts_with(s) && lower.len() > s.len())
}

fn list_block(ordered: bool, rich_text: Vec<RichTextSpan>, children: Vec<Block>) -> Block {
    if ordered {
        Block::NumberedItem {
            rich_text,
            children,
        }
    } else {
        Block::BulletedItem {
            rich_text,
            children,
        }
    }
}

fn collect_rows<'e>(e: &'e Element, rows: &mut Vec<&'e Element>) {
    for c in e.child_elements() {
        match lookup(&c.name) {
            Some(TagKind::Row) => rows.push(c),
            Some(TagKind::TableSection) => collect_rows(c, rows),
            _ => {}
        }
    }
}

fn cells_of(row: &Element) -> Vec<&Element> {
    row.child_elements()
        .filter(|c| lookup(&c.name) == Some(TagKind::Cell))
        .collect()
}

/// Preformatted text of a subtree: whitespace kept, `<br>` and block
/// boundaries become newlines.
fn raw_text(e: &Element, buf: &mut String) {
    for child in &e.children {
        match child {
            MarkupNode::Text(text) => buf.push_str(&decode_entities(text)),
            MarkupNode::Element(c) => match lookup(&c.name) {
                Some(TagKind::Break) => buf.push('\n'),
                Some(TagKind::Ignore) => {}
                Some(
                    TagKind::Container
                    | TagKind::ListItem
                    | TagKind::Row
                    | TagKind::Heading(_)
                    | TagKind::Quote,
                ) => {
                    if !buf.is_empty() && !buf.ends_with('\n') {
                        buf.push('\n');
                    }
                    raw_text(c, buf);
                    if !buf.ends_with('\n') {
                        buf.push('\n');
                    }
                }
                _ => raw_text(c, buf),
            },
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN
        .replace_all(text, " ")
        .replace('\u{a0}', " ")
}

fn push_text(raw: &str, ann: &Annotations, run: &mut Vec<Inline>) {
    let decoded = decode_entities(raw);
    if decoded.is_empty() {
        return;
    }
    let text = collapse_whitespace(&decoded);
    run.push(Inline::Span(RichTextSpan::new(text, ann.clone())));
}

fn inline_to_span(item: Inline) -> Option<RichTextSpan> {
    match item {
        Inline::Span(span) => Some(span),
        Inline::Break(ann) => Some(RichTextSpan::new("\n", ann)),
        Inline::Todo(_) => None,
    }
}

fn is_blank(spans: &[RichTextSpan]) -> bool {
    spans.iter().all(|s| s.text.trim().is_empty())
}

/// Merge identical neighbours, tidy whitespace around line breaks and trim
/// the ends of the sequence.
fn normalize(spans: Vec<RichTextSpan>) -> Vec<RichTextSpan> {
    let mut merged: Vec<RichTextSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.annotations == span.annotations => last.text.push_str(&span.text),
            _ => merged.push(span),
        }
    }

    // Collapsed whitespace between two spans may have left a double space.
    for i in 1..merged.len() {
        if merged[i - 1].text.ends_with([' ', '\n']) {
            let trimmed = merged[i].text.trim_start_matches(' ').to_string();
            merged[i].text = trimmed;
        }
    }

    for span in &mut merged {
        while span.text.contains(" \n") || span.text.contains("\n ") {
            span.text = span.text.replace(" \n", "\n").replace("\n ", "\n");
        }
        while span.text.contains("  ") && !span.annotations.code {
            span.text = span.text.replace("  ", " ");
        }
    }

    while let Some(first) = merged.first_mut() {
        let trimmed = first.text.trim_start().to_string();
        if trimmed.is_empty() {
            merged.remove(0);
        } else {
            first.text = trimmed;
            break;
        }
    }
    while let Some(last) = merged.last_mut() {
        let trimmed = last.text.trim_end().to_string();
        if trimmed.is_empty() {
            merged.pop();
        } else {
            last.text = trimmed;
            break;
        }
    }
    merged.retain(|s| !s.text.is_empty());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{plain_text, Color};
    use crate::markup::parse_markup;
    use crate::model::Resource;

    fn run(enml: &str) -> Conversion {
        convert(&parse_markup(enml).unwrap(), &ResourceIndex::default())
    }

    fn run_with(enml: &str, index: &ResourceIndex) -> Conversion {
        convert(&parse_markup(enml).unwrap(), index)
    }

    fn text_of(block: &Block) -> String {
        plain_text(block.rich_text().unwrap_or_default())
    }

    #[test]
    fn heading_paragraph_todo_scenario() {
        let c = run(concat!(
            "<en-note><h1>Title</h1>",
            "<div><b><i>Hello world</i></b></div>",
            "<div><en-todo checked=\"true\"/>Done</div></en-note>"
        ));
        assert_eq!(c.blocks.len(), 3);
        assert!(matches!(&c.blocks[0], Block::Heading { level: 1, .. }));
        assert_eq!(text_of(&c.blocks[0]), "Title");

        let Block::Paragraph { rich_text } = &c.blocks[1] else {
            panic!("expected paragraph, got {:?}", c.blocks[1]);
        };
        assert_eq!(rich_text.len(), 1);
        assert_eq!(rich_text[0].text, "Hello world");
        assert!(rich_text[0].annotations.bold);
        assert!(rich_text[0].annotations.italic);

        assert!(matches!(&c.blocks[2], Block::ToDo { checked: true, .. }));
        assert_eq!(text_of(&c.blocks[2]), "Done");
        assert!(c.warnings.is_empty());
    }

    #[test]
    fn conversion_is_deterministic() {
        let enml = "<en-note><div>a <b>b</b> <i>c</i></div><ul><li>x<ul><li>y</li></ul></li></ul></en-note>";
        assert_eq!(run(enml), run(enml));
    }

    #[test]
    fn deep_headings_become_bold_h3() {
        let c = run("<en-note><h5>Small <i>print</i></h5></en-note>");
        let Block::Heading { level, rich_text } = &c.blocks[0] else {
            panic!("expected heading");
        };
        assert_eq!(*level, 3);
        assert!(rich_text.iter().all(|s| s.annotations.bold));
        assert!(rich_text[1].annotations.italic);
    }

    #[test]
    fn empty_containers() {
        let c = run("<en-note><div><br/></div><div>   </div><div></div></en-note>");
        assert_eq!(c.blocks, vec![Block::empty_paragraph()]);
    }

    #[test]
    fn line_breaks_stay_inside_paragraph() {
        let c = run("<en-note><div>one<br/>two</div></en-note>");
        assert_eq!(c.blocks.len(), 1);
        assert_eq!(text_of(&c.blocks[0]), "one\ntwo");
    }

    #[test]
    fn annotations_accumulate_from_ancestors() {
        let c = run(
            r#"<en-note><div><u><span style="color: #ff0000"><b>x</b></span></u></div></en-note>"#,
        );
        let span = &c.blocks[0].rich_text().unwrap()[0];
        assert!(span.annotations.underline);
        assert!(span.annotations.bold);
        assert_eq!(span.annotations.color, Some(Color::Red));
    }

    #[test]
    fn link_text_equal_to_href_is_kept() {
        let c = run(r#"<en-note><div><a href="https://example.com">https://example.com</a></div></en-note>"#);
        let spans = c.blocks[0].rich_text().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "https://example.com");
        assert_eq!(spans[0].annotations.link.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn link_query_string_ampersands_are_decoded() {
        let c = run(r#"<en-note><div><a href="https://x.com/?a=1&amp;b=2">t</a></div></en-note>"#);
        let spans = c.blocks[0].rich_text().unwrap();
        assert_eq!(spans[0].annotations.link.as_deref(), Some("https://x.com/?a=1&b=2"));
    }

    #[test]
    fn entities_are_decoded() {
        let c = run("<en-note><div>Fish &amp; chips&nbsp;&mdash; &#169;</div></en-note>");
        assert_eq!(text_of(&c.blocks[0]), "Fish & chips \u{2014} \u{a9}");
    }

    #[test]
    fn adjacent_identical_spans_merge() {
        let c = run("<en-note><div><b>a</b><b>b</b>c</div></en-note>");
        let spans = c.blocks[0].rich_text().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "ab");
    }

    #[test]
    fn three_level_nested_list() {
        let c = run(
            "<en-note><ul><li>one<ul><li>two<ul><li>three</li></ul></li></ul></li></ul></en-note>",
        );
        assert_eq!(c.blocks.len(), 1);
        let l1 = &c.blocks[0];
        assert!(matches!(l1, Block::BulletedItem { .. }));
        assert_eq!(text_of(l1), "one");
        let l2 = &l1.children()[0];
        assert_eq!(text_of(l2), "two");
        let l3 = &l2.children()[0];
        assert_eq!(text_of(l3), "three");
        assert!(l3.children().is_empty());
    }

    #[test]
    fn evernote_style_list_items_and_sibling_nesting() {
        let c = run(concat!(
            "<en-note><ol><li><div>first</div></li>",
            "<ul><li><div>nested</div></li></ul>",
            "<li><div>second</div></li></ol></en-note>"
        ));
        assert_eq!(c.blocks.len(), 2);
        assert!(matches!(c.blocks[0], Block::NumberedItem { .. }));
        assert_eq!(text_of(&c.blocks[0]), "first");
        assert_eq!(text_of(&c.blocks[0].children()[0]), "nested");
        assert!(matches!(c.blocks[0].children()[0], Block::BulletedItem { .. }));
        assert_eq!(text_of(&c.blocks[1]), "second");
    }

    #[test]
    fn todo_without_attribute_is_unchecked() {
        let c = run("<en-note><div><en-todo/>Later</div><div><en-todo checked=\"false\"/>No</div></en-note>");
        assert!(matches!(c.blocks[0], Block::ToDo { checked: false, .. }));
        assert!(matches!(c.blocks[1], Block::ToDo { checked: false, .. }));
    }

    #[test]
    fn checklist_item_becomes_a_todo() {
        let c = run(concat!(
            "<en-note><ul>",
            "<li><en-todo checked=\"true\"/>Done</li>",
            "<li><en-todo/>Open<ul><li>detail</li></ul></li>",
            "<li>plain</li>",
            "</ul></en-note>"
        ));
        assert_eq!(c.blocks.len(), 4);
        assert!(matches!(&c.blocks[0], Block::ToDo { checked: true, .. }));
        assert_eq!(text_of(&c.blocks[0]), "Done");
        assert!(matches!(&c.blocks[1], Block::ToDo { checked: false, .. }));
        assert_eq!(text_of(&c.blocks[1]), "Open");
        // what follows the to-do inside the item stays beside it
        assert!(matches!(&c.blocks[2], Block::BulletedItem { .. }));
        assert_eq!(text_of(&c.blocks[2]), "detail");
        assert!(matches!(&c.blocks[3], Block::BulletedItem { .. }));
        assert_eq!(text_of(&c.blocks[3]), "plain");
    }

    #[test]
    fn text_before_todo_stays_a_paragraph() {
        let c = run("<en-note><div>Intro <en-todo checked=\"true\"/>A<en-todo/>B</div></en-note>");
        assert_eq!(c.blocks.len(), 3);
        assert_eq!(text_of(&c.blocks[0]), "Intro");
        assert!(matches!(&c.blocks[1], Block::ToDo { checked: true, .. }));
        assert_eq!(text_of(&c.blocks[2]), "B");
    }

    #[test]
    fn table_with_header() {
        let c = run(concat!(
            "<en-note><table><tbody>",
            "<tr><th>Name</th><th>Age</th></tr>",
            "<tr><td>Ada</td><td>36</td></tr>",
            "</tbody></table></en-note>"
        ));
        let Block::Table {
            width,
            has_header,
            children,
        } = &c.blocks[0]
        else {
            panic!("expected table");
        };
        assert_eq!(*width, 2);
        assert!(*has_header);
        assert_eq!(children.len(), 2);
        let Block::TableRow { cells } = &children[1] else {
            panic!("expected row");
        };
        assert_eq!(plain_text(&cells[0]), "Ada");
    }

    #[test]
    fn table_rows_are_padded_and_truncated() {
        let c = run(concat!(
            "<en-note><table>",
            "<tr><td>a</td><td>b</td></tr>",
            "<tr><td>c</td></tr>",
            "<tr><td>d</td><td>e</td><td>f</td></tr>",
            "</table></en-note>"
        ));
        let Block::Table {
            has_header,
            children,
            ..
        } = &c.blocks[0]
        else {
            panic!("expected table");
        };
        assert!(!has_header);
        for row in children {
            let Block::TableRow { cells } = row else {
                panic!("expected row");
            };
            assert_eq!(cells.len(), 2);
        }
        assert_eq!(
            c.warnings,
            vec![ConversionWarning::RowTruncated {
                row: 2,
                cells: 3,
                width: 2
            }]
        );
    }

    #[test]
    fn media_resolution_by_mime() {
        let img = Resource::from_bytes(b"img".to_vec(), "image/png");
        let pdf = Resource::from_bytes(b"pdf".to_vec(), "application/pdf");
        let zip = Resource::from_bytes(b"zip".to_vec(), "application/zip").with_filename("a.zip");
        let mut index = ResourceIndex::build(vec![img.clone(), pdf.clone(), zip.clone()]);
        index.set_url(&img.hash, "https://cdn/i.png");
        index.set_url(&pdf.hash, "https://cdn/p.pdf");
        index.set_url(&zip.hash, "https://cdn/a.zip");

        let enml = format!(
            r#"<en-note><en-media hash="{}" type="image/png"/><en-media hash="{}" type="application/pdf"/><div><en-media hash="{}" type="application/zip"/></div></en-note>"#,
            img.hash, pdf.hash, zip.hash
        );
        let c = run_with(&enml, &index);
        assert_eq!(
            c.blocks,
            vec![
                Block::Image {
                    url: "https://cdn/i.png".into()
                },
                Block::Pdf {
                    url: "https://cdn/p.pdf".into()
                },
                Block::File {
                    url: "https://cdn/a.zip".into(),
                    name: Some("a.zip".into())
                },
            ]
        );
    }

    #[test]
    fn missing_media_is_omitted_with_warning() {
        let missing = "0123456789abcdef0123456789abcdef";
        let c = run(&format!(
            r#"<en-note><div>before</div><en-media hash="{missing}" type="image/png"/><div>after</div></en-note>"#
        ));
        assert_eq!(c.blocks.len(), 2);
        assert_eq!(
            c.warnings,
            vec![ConversionWarning::MissingMedia {
                hash: missing.into()
            }]
        );
    }

    #[test]
    fn media_without_url_is_omitted() {
        let img = Resource::from_bytes(b"img".to_vec(), "image/png");
        let index = ResourceIndex::build(vec![img.clone()]);
        let c = run_with(&format!(r#"<en-note><en-media hash="{}"/></en-note>"#, img.hash), &index);
        assert!(c.blocks.is_empty());
        assert!(matches!(c.warnings[0], ConversionWarning::MediaNotUploaded { .. }));
    }

    #[test]
    fn media_inside_inline_splits_paragraph() {
        let img = Resource::from_bytes(b"img".to_vec(), "image/png");
        let mut index = ResourceIndex::build(vec![img.clone()]);
        index.set_url(&img.hash, "https://cdn/i.png");
        let c = run_with(
            &format!(r#"<en-note><div><span>left <en-media hash="{}"/> right</span></div></en-note>"#, img.hash),
            &index,
        );
        let kinds: Vec<&str> = c.blocks.iter().map(Block::kind).collect();
        assert_eq!(kinds, vec!["paragraph", "image", "paragraph"]);
    }

    #[test]
    fn unknown_tags_are_unwrapped_once_warned() {
        let c = run("<en-note><div><blink>hi</blink> <blink>there</blink></div></en-note>");
        assert_eq!(text_of(&c.blocks[0]), "hi there");
        assert_eq!(
            c.warnings,
            vec![ConversionWarning::UnsupportedTag {
                tag: "blink".into()
            }]
        );
    }

    #[test]
    fn extra_block_kinds() {
        let c = run(concat!(
            "<en-note><hr/><blockquote>quoted</blockquote>",
            "<pre>fn main() {\n    run();\n}</pre>",
            "<div><s>gone</s></div></en-note>"
        ));
        let kinds: Vec<&str> = c.blocks.iter().map(Block::kind).collect();
        assert_eq!(kinds, vec!["divider", "quote", "code", "paragraph"]);
        assert_eq!(text_of(&c.blocks[2]), "fn main() {\n    run();\n}");
        assert!(c.blocks[3].rich_text().unwrap()[0].annotations.strikethrough);
    }

    #[test]
    fn evernote_code_block_div() {
        let c = run(concat!(
            r#"<en-note><div style="box-sizing: border-box; -en-codeblock:true;">"#,
            "<div>let x = 1;</div><div>let y = 2;</div></div></en-note>"
        ));
        assert_eq!(c.blocks.len(), 1);
        assert!(matches!(c.blocks[0], Block::Code { .. }));
        assert_eq!(text_of(&c.blocks[0]), "let x = 1;\nlet y = 2;");
    }

    #[test]
    fn oversized_paragraph_splits_into_siblings() {
        let long = "word ".repeat(700);
        let c = run(&format!("<en-note><div>{long}</div></en-note>"));
        assert!(c.blocks.len() >= 2);
        assert!(c
            .blocks
            .iter()
            .all(|b| matches!(b, Block::Paragraph { .. })
                && crate::block::rich_text_len(b.rich_text().unwrap()) <= MAX_RICH_TEXT_LEN));
        let joined: String = c.blocks.iter().map(text_of).collect();
        assert_eq!(joined.split_whitespace().count(), 700);
    }

    #[test]
    fn non_http_links_keep_text_only() {
        let c = run(r#"<en-note><div><a href="evernote:///view/123">other note</a></div></en-note>"#);
        let span = &c.blocks[0].rich_text().unwrap()[0];
        assert_eq!(span.text, "other note");
        assert_eq!(span.annotations.link, None);
    }

    #[test]
    fn font_color_and_unknown_color() {
        let c = run(r#"<en-note><div><font color="blue">b</font><span style="color: inherit">x</span></div></en-note>"#);
        let spans = c.blocks[0].rich_text().unwrap();
        assert_eq!(spans[0].annotations.color, Some(Color::Blue));
        assert!(matches!(c.warnings[0], ConversionWarning::UnknownColor { .. }));
    }

    #[test]
    fn https_images_only() {
        let c = run(concat!(
            r#"<en-note><img src="https://example.com/a.png"/>"#,
            r#"<img src="data:image/png;base64,AAAA"/></en-note>"#
        ));
        assert_eq!(c.blocks.len(), 1);
        assert!(matches!(c.warnings[0], ConversionWarning::UnsupportedImageSource { .. }));
    }
}
