//! Rich-text length limits.
//!
//! A block's rich text may hold at most [`MAX_RICH_TEXT_LEN`] characters and
//! [`MAX_SPANS_PER_BLOCK`] spans. Oversized spans are split, preferring the
//! last whitespace at or before the limit; the pieces concatenate back to the
//! original text exactly. Splits fall on `char` boundaries, so a multi-byte
//! character is never cut.

use crate::block::{rich_text_len, RichTextSpan, MAX_RICH_TEXT_LEN};

/// Maximum rich-text objects in one block.
pub const MAX_SPANS_PER_BLOCK: usize = 100;

/// Split one span into pieces of at most `limit` characters.
pub fn split_span(span: RichTextSpan, limit: usize) -> Vec<RichTextSpan> {
    let limit = limit.max(1);
    if span.len() <= limit {
        return vec![span];
    }

    let mut pieces = Vec::new();
    let mut rest = span.text.as_str();
    while rest.chars().count() > limit {
        let cut = split_point(rest, limit);
        let (head, tail) = rest.split_at(cut);
        pieces.push(RichTextSpan::new(head, span.annotations.clone()));
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(RichTextSpan::new(rest, span.annotations.clone()));
    }
    pieces
}

/// Byte offset to split `text` at: just after the last whitespace within
/// the first `limit` characters, or exactly at `limit` characters.
fn split_point(text: &str, limit: usize) -> usize {
    let hard = text
        .char_indices()
        .nth(limit)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..hard]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(hard)
}

/// Split oversized spans, then pack them into groups that each fit one block.
///
/// Always returns at least one group (possibly empty) so callers can emit a
/// block per group unconditionally.
pub fn pack_rich_text(spans: Vec<RichTextSpan>, limit: usize) -> Vec<Vec<RichTextSpan>> {
    let mut groups: Vec<Vec<RichTextSpan>> = vec![Vec::new()];
    let mut current_len = 0usize;

    for span in spans.into_iter().flat_map(|s| split_span(s, limit)) {
        let len = span.len();
        let full = groups.last().map_or(0, Vec::len) >= MAX_SPANS_PER_BLOCK;
        if (current_len + len > limit || full) && current_len > 0 {
            groups.push(Vec::new());
            current_len = 0;
        }
        if let Some(group) = groups.last_mut() {
            group.push(span);
        }
        current_len += len;
    }
    groups
}

/// Clamp a table cell: cells cannot be split into sibling blocks, so pieces
/// stay in the same cell but each respects the per-span limit.
pub fn split_cell(spans: Vec<RichTextSpan>, limit: usize) -> Vec<RichTextSpan> {
    spans
        .into_iter()
        .flat_map(|s| split_span(s, limit))
        .collect()
}

/// Whether a rich-text sequence already fits one block.
pub fn fits(spans: &[RichTextSpan]) -> bool {
    rich_text_len(spans) <= MAX_RICH_TEXT_LEN && spans.len() <= MAX_SPANS_PER_BLOCK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{plain_text, Annotations};

    #[test]
    fn short_span_untouched() {
        let s = RichTextSpan::plain("hello");
        assert_eq!(split_span(s.clone(), 10), vec![s]);
    }

    #[test]
    fn splits_at_whitespace() {
        let pieces = split_span(RichTextSpan::plain("aaaa bbbb cccc"), 10);
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa bbbb ", "cccc"]);
    }

    #[test]
    fn hard_split_without_whitespace() {
        let pieces = split_span(RichTextSpan::plain("abcdefghij"), 4);
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn never_cuts_multibyte_chars() {
        let text = "é".repeat(25) + "日本語".repeat(10).as_str();
        let pieces = split_span(RichTextSpan::plain(text.clone()), 7);
        assert!(pieces.iter().all(|p| p.len() <= 7));
        assert_eq!(pieces.iter().map(|p| p.text.as_str()).collect::<String>(), text);
    }

    #[test]
    fn concatenation_is_exact_at_real_limit() {
        let word = "lorem ipsum dolor sit amet ";
        let text = word.repeat(300);
        let span = RichTextSpan::new(text.clone(), Annotations::bold());
        let pieces = split_span(span, MAX_RICH_TEXT_LEN);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.len() <= MAX_RICH_TEXT_LEN));
        assert!(pieces.iter().all(|p| p.annotations.bold));
        assert_eq!(pieces.iter().map(|p| p.text.as_str()).collect::<String>(), text);
    }

    #[test]
    fn packing_respects_block_limit() {
        let spans = vec![
            RichTextSpan::plain("x".repeat(6)),
            RichTextSpan::plain("y".repeat(6)),
            RichTextSpan::plain("z".repeat(3)),
        ];
        let groups = pack_rich_text(spans, 10);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| rich_text_len(g) <= 10));
        let joined: String = groups.iter().map(|g| plain_text(g)).collect();
        assert_eq!(joined, "xxxxxxyyyyyyzzz");
    }

    #[test]
    fn packing_empty_yields_one_empty_group() {
        assert_eq!(pack_rich_text(Vec::new(), 10), vec![Vec::new()]);
    }

    #[test]
    fn packing_caps_span_count() {
        let spans: Vec<_> = (0..150).map(|_| RichTextSpan::plain("a")).collect();
        let groups = pack_rich_text(spans, MAX_RICH_TEXT_LEN);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), MAX_SPANS_PER_BLOCK);
        assert!(groups.iter().all(|g| fits(g)));
    }
}
