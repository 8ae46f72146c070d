//! ENML string → [`MarkupNode`] tree.
//!
//! ENML is XHTML in theory and tag soup in practice: exports contain HTML
//! void elements written without a closing slash, stray end tags and named
//! HTML entities undeclared in XML. The parser therefore runs `quick-xml`
//! with end-name checks off and repairs structure itself:
//!
//! * void tags (`br`, `hr`, `img`, `en-media`, `en-todo`, …) never open a scope,
//! * an end tag closes the nearest open element of that name (and everything
//!   opened after it); an end tag with no open match is ignored,
//! * text is kept raw; entity decoding happens in the converter so that
//!   undeclared HTML entities survive,
//! * attribute values are decoded here (`&amp;` in an `href` is a plain `&`).

use super::entities::decode_entities;
use super::{Element, MarkupNode};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Tags that never have children, however they are written.
const VOID_TAGS: &[&str] = &[
    "br", "hr", "img", "en-media", "en-todo", "en-crypt", "col", "input", "meta", "link", "area",
    "wbr",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed markup at byte {position}: {detail}")]
    Malformed { position: u64, detail: String },

    #[error("markup contains no elements")]
    Empty,
}

/// Parse ENML (optionally CDATA-wrapped, with XML declaration and DOCTYPE)
/// into its root element, normally `<en-note>`.
pub fn parse_markup(input: &str) -> Result<Element, ParseError> {
    let body = strip_cdata(input.trim());

    let mut reader = Reader::from_str(body);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    // Synthetic document root collecting top-level nodes.
    let mut stack: Vec<Element> = vec![Element::new("#document")];

    loop {
        let event = reader.read_event().map_err(|e| ParseError::Malformed {
            position: reader.buffer_position() as u64,
            detail: e.to_string(),
        })?;
        match event {
            Event::Start(e) => {
                let el = element_from(&e);
                if is_void(&el.name) {
                    push_child(&mut stack, MarkupNode::Element(el));
                } else {
                    stack.push(el);
                }
            }
            Event::Empty(e) => {
                push_child(&mut stack, MarkupNode::Element(element_from(&e)));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                close_element(&mut stack, &name);
            }
            Event::Text(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                if !text.is_empty() {
                    push_child(&mut stack, MarkupNode::Text(text));
                }
            }
            Event::CData(c) => {
                // Nested CDATA content is literal text; escape it so entity
                // decoding later is an identity on it.
                let raw = String::from_utf8_lossy(&c.into_inner()).into_owned();
                push_child(&mut stack, MarkupNode::Text(escape_amp(&raw)));
            }
            Event::Eof => break,
            // Declarations, doctype, comments and PIs carry no content.
            _ => {}
        }
    }

    // Close anything left open.
    while stack.len() > 1 {
        if let Some(open) = stack.pop() {
            push_child(&mut stack, MarkupNode::Element(open));
        }
    }

    let document = stack.pop().ok_or(ParseError::Empty)?;
    let mut elements = document.children.into_iter().filter_map(|n| match n {
        MarkupNode::Element(e) => Some(e),
        MarkupNode::Text(_) => None,
    });
    elements.next().ok_or(ParseError::Empty)
}

fn strip_cdata(input: &str) -> &str {
    input
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(input)
}

fn escape_amp(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;")
}

fn is_void(name: &str) -> bool {
    VOID_TAGS.contains(&name)
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
    let mut el = Element::new(name);
    for attr in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let raw = String::from_utf8_lossy(&attr.value);
        let value = decode_entities(&raw).into_owned();
        el.attrs.push((key, value));
    }
    el
}

fn push_child(stack: &mut [Element], node: MarkupNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn close_element(stack: &mut Vec<Element>, name: &str) {
    // Index 0 is the synthetic document root and is never closed.
    let Some(pos) = stack.iter().rposition(|e| e.name == name) else {
        return;
    };
    if pos == 0 {
        return;
    }
    while stack.len() > pos {
        if let Some(open) = stack.pop() {
            push_child(stack, MarkupNode::Element(open));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE en-note SYSTEM "http://xml.evernote.com/pub/enml2.dtd">
<en-note><div>Hello <b>world</b></div></en-note>"#;

    #[test]
    fn parses_declaration_and_doctype() {
        let root = parse_markup(DOC).unwrap();
        assert_eq!(root.name, "en-note");
        let div = root.child_elements().next().unwrap();
        assert_eq!(div.name, "div");
        assert_eq!(div.children.len(), 2);
    }

    #[test]
    fn strips_cdata_wrapper() {
        let wrapped = format!("<![CDATA[{DOC}]]>");
        assert_eq!(parse_markup(&wrapped).unwrap().name, "en-note");
    }

    #[test]
    fn void_tags_do_not_swallow_siblings() {
        let root = parse_markup("<en-note><div>a<br>b</div><hr><p>c</p></en-note>").unwrap();
        let names: Vec<&str> = root.child_elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["div", "hr", "p"]);
        let div = root.child_elements().next().unwrap();
        assert_eq!(div.children.len(), 3);
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let root = parse_markup("<en-note><div>x</span></div></en-note>").unwrap();
        assert_eq!(root.child_elements().count(), 1);
    }

    #[test]
    fn unclosed_elements_are_closed_at_eof() {
        let root = parse_markup("<en-note><div><b>bold").unwrap();
        let div = root.child_elements().next().unwrap();
        assert_eq!(div.child_elements().next().unwrap().name, "b");
    }

    #[test]
    fn text_keeps_entities_raw() {
        let root = parse_markup("<en-note><div>a &amp; b&nbsp;c</div></en-note>").unwrap();
        let div = root.child_elements().next().unwrap();
        assert_eq!(
            div.children[0],
            MarkupNode::Text("a &amp; b&nbsp;c".to_string())
        );
    }

    #[test]
    fn attributes_are_collected() {
        let root =
            parse_markup(r#"<en-note><en-todo checked="true"/><a href="https://x.io">x</a></en-note>"#)
                .unwrap();
        let todo = root.child_elements().next().unwrap();
        assert_eq!(todo.attr("checked"), Some("true"));
    }

    #[test]
    fn attribute_values_are_decoded() {
        let root = parse_markup(
            r#"<en-note><a href="https://x.com/?a=1&amp;b=2" title="caf&eacute;&nbsp;&#35;1">t</a></en-note>"#,
        )
        .unwrap();
        let a = root.child_elements().next().unwrap();
        assert_eq!(a.attr("href"), Some("https://x.com/?a=1&b=2"));
        assert_eq!(a.attr("title"), Some("caf\u{e9}\u{a0}#1"));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(parse_markup("   "), Err(ParseError::Empty));
    }
}
