//! ENML markup: tree model, parser and the block converter.
//!
//! ```text
//! raw ENML ──parse_markup──▶ Element tree ──convert──▶ Vec<Block> + warnings
//!                                              ▲
//!                                   ResourceIndex (hash → URL)
//! ```

pub mod color;
pub mod convert;
pub mod entities;
pub mod limits;
pub mod parse;

pub use convert::{convert, convert_with_limit, Conversion};
pub use parse::{parse_markup, ParseError};

/// A node of the parsed markup tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element(Element),
    /// Raw text; entities are still encoded.
    Text(String),
}

/// A tag with its attributes (names lowercased) and ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_child(mut self, child: MarkupNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            MarkupNode::Element(e) => Some(e),
            MarkupNode::Text(_) => None,
        })
    }

    /// Value of one declaration inside the `style` attribute.
    pub fn style_property(&self, property: &str) -> Option<String> {
        let style = self.attr("style")?;
        style.split(';').find_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case(property)
                .then(|| v.trim().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_property_lookup() {
        let el = Element::new("span").with_attr("style", "font-weight: bold; COLOR:#ff0000 ;");
        assert_eq!(el.style_property("color").as_deref(), Some("#ff0000"));
        assert_eq!(el.style_property("font-weight").as_deref(), Some("bold"));
        assert_eq!(el.style_property("margin"), None);
    }
}
